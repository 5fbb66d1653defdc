//! Typed plugin registry.
//!
//! Review allocation strategies and post-clone actions are registered once at
//! startup and invoked in registration order. Strategy output is validated by
//! the allocator, never trusted.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::PostCloneConfig;
use crate::error::{RepomateError, Result};
use crate::review::{Allocation, AllocationRequest, ReviewAllocationStrategy, RoundRobinStrategy};

/// Outcome class of a post-clone action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Success,
    /// The action ran but reported a problem with the repo.
    Warning,
    /// The action itself could not run to completion.
    Error,
}

impl std::fmt::Display for HookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookStatus::Success => "success",
            HookStatus::Warning => "warning",
            HookStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResult {
    pub hook: String,
    pub status: HookStatus,
    pub msg: String,
}

impl HookResult {
    pub fn new(hook: impl Into<String>, status: HookStatus, msg: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            status,
            msg: msg.into(),
        }
    }
}

/// Runs against every successfully cloned student repo.
#[async_trait]
pub trait PostCloneAction: Send + Sync {
    fn name(&self) -> &str;

    async fn act_on_cloned_repo(&self, repo_path: &Path) -> HookResult;
}

/// Registered strategies and actions, in registration order.
#[derive(Default)]
pub struct Registry {
    strategies: Vec<Box<dyn ReviewAllocationStrategy>>,
    post_clone: Vec<Box<dyn PostCloneAction>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("strategies", &self.strategy_names())
            .field("post_clone", &self.post_clone_names())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the unseeded round-robin strategy.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_strategy(RoundRobinStrategy::default());
        registry
    }

    pub fn register_strategy(&mut self, strategy: impl ReviewAllocationStrategy + 'static) {
        debug!(strategy = strategy.name(), "registered allocation strategy");
        self.strategies.push(Box::new(strategy));
    }

    pub fn register_post_clone(&mut self, action: impl PostCloneAction + 'static) {
        debug!(action = action.name(), "registered post-clone action");
        self.post_clone.push(Box::new(action));
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn post_clone_names(&self) -> Vec<&str> {
        self.post_clone.iter().map(|a| a.name()).collect()
    }

    pub fn has_post_clone_actions(&self) -> bool {
        !self.post_clone.is_empty()
    }

    /// Ask each strategy in turn; the first allocation returned wins.
    /// Returns the winning strategy's name with its allocation.
    pub fn allocate(&self, request: &AllocationRequest<'_>) -> Option<(String, Allocation)> {
        self.strategies.iter().find_map(|strategy| {
            strategy
                .allocate(request)
                .map(|allocation| (strategy.name().to_string(), allocation))
        })
    }

    /// Run every post-clone action on `repo_path`, one after the other.
    pub async fn run_post_clone(&self, repo_path: &Path) -> Vec<HookResult> {
        let mut results = Vec::with_capacity(self.post_clone.len());
        for action in &self.post_clone {
            let result = action.act_on_cloned_repo(repo_path).await;
            info!(
                event = "hook.finished",
                hook = %result.hook,
                repo = %repo_path.display(),
                status = %result.status,
            );
            results.push(result);
        }
        results
    }
}

/// Post-clone action running an external command inside the repo.
///
/// Exit status 0 maps to [`HookStatus::Success`], any other exit code to
/// [`HookStatus::Warning`]. Failing to start, a timeout or death by signal is
/// [`HookStatus::Error`].
#[derive(Debug, Clone)]
pub struct CommandAction {
    name: String,
    command: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAction {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let name = name.into();
        if command.is_empty() {
            return Err(RepomateError::InvalidArgument(format!(
                "post-clone action '{name}' has an empty command"
            )));
        }
        Ok(Self {
            name,
            command,
            timeout,
        })
    }

    pub fn from_config(config: &PostCloneConfig) -> Result<Self> {
        Self::new(
            config.name.clone(),
            config.command.split_whitespace().map(str::to_string).collect(),
            config.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
        )
    }

    async fn execute(&self, repo_path: &Path) -> std::io::Result<Option<std::process::Output>> {
        let child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output.map(Some),
                Err(_) => Ok(None),
            },
            None => child.wait_with_output().await.map(Some),
        }
    }
}

#[async_trait]
impl PostCloneAction for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn act_on_cloned_repo(&self, repo_path: &Path) -> HookResult {
        let start = Instant::now();
        let result = match self.execute(repo_path).await {
            Err(e) => HookResult::new(
                &self.name,
                HookStatus::Error,
                format!("failed to run {}: {e}", self.command[0]),
            ),
            Ok(None) => HookResult::new(
                &self.name,
                HookStatus::Error,
                format!(
                    "timed out after {} seconds",
                    self.timeout.map(|t| t.as_secs()).unwrap_or_default()
                ),
            ),
            Ok(Some(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                match output.status.code() {
                    Some(0) => HookResult::new(&self.name, HookStatus::Success, stdout),
                    Some(code) => {
                        let detail = if stderr.is_empty() { stdout } else { stderr };
                        HookResult::new(
                            &self.name,
                            HookStatus::Warning,
                            format!("exited with code {code}: {detail}"),
                        )
                    }
                    None => HookResult::new(&self.name, HookStatus::Error, "terminated by signal"),
                }
            }
        };
        debug!(
            hook = %self.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "post-clone action finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    struct Declining;

    impl ReviewAllocationStrategy for Declining {
        fn name(&self) -> &str {
            "declining"
        }

        fn allocate(&self, _request: &AllocationRequest<'_>) -> Option<Allocation> {
            None
        }
    }

    struct Fixed;

    impl ReviewAllocationStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn allocate(&self, _request: &AllocationRequest<'_>) -> Option<Allocation> {
            Some(BTreeMap::new())
        }
    }

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PostCloneAction for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn act_on_cloned_repo(&self, _repo_path: &Path) -> HookResult {
            self.log.lock().unwrap().push(self.name.to_string());
            HookResult::new(self.name, HookStatus::Success, "")
        }
    }

    fn request<'a>(students: &'a [String]) -> AllocationRequest<'a> {
        AllocationRequest {
            master_repo_name: "lab1",
            students,
            reviews_per_student: 1,
        }
    }

    #[test]
    fn test_first_allocation_wins() {
        let students = vec!["a".to_string(), "b".to_string()];
        let mut registry = Registry::new();
        registry.register_strategy(Declining);
        registry.register_strategy(Fixed);
        registry.register_strategy(RoundRobinStrategy::default());

        let (name, allocation) = registry.allocate(&request(&students)).unwrap();
        assert_eq!(name, "fixed");
        assert!(allocation.is_empty());
    }

    #[test]
    fn test_no_strategy_yields_none() {
        let students = vec!["a".to_string(), "b".to_string()];
        assert!(Registry::new().allocate(&request(&students)).is_none());
    }

    #[test]
    fn test_defaults_register_round_robin() {
        assert_eq!(Registry::with_defaults().strategy_names(), vec!["round-robin"]);
    }

    #[tokio::test]
    async fn test_post_clone_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        for name in ["first", "second", "third"] {
            registry.register_post_clone(Recording {
                name,
                log: log.clone(),
            });
        }

        let dir = tempfile::tempdir().unwrap();
        let results = registry.run_post_clone(dir.path()).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        let hooks: Vec<_> = results.iter().map(|r| r.hook.as_str()).collect();
        assert_eq!(hooks, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_command_action_rejects_empty_command() {
        let config = PostCloneConfig {
            name: "noop".to_string(),
            command: "   ".to_string(),
            timeout_secs: None,
        };
        assert!(matches!(
            CommandAction::from_config(&config),
            Err(RepomateError::InvalidArgument(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_success_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let action = CommandAction::new("ls", vec!["ls".to_string()], None).unwrap();

        let result = action.act_on_cloned_repo(dir.path()).await;
        assert_eq!(result.status, HookStatus::Success);
        assert!(result.msg.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_nonzero_exit_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        let action = CommandAction::new("false", vec!["false".to_string()], None).unwrap();

        let result = action.act_on_cloned_repo(dir.path()).await;
        assert_eq!(result.status, HookStatus::Warning);
        assert!(result.msg.contains("exited with code 1"));
    }

    #[tokio::test]
    async fn test_command_action_missing_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let action = CommandAction::new(
            "missing",
            vec!["repomate-no-such-program".to_string()],
            None,
        )
        .unwrap();

        let result = action.act_on_cloned_repo(dir.path()).await;
        assert_eq!(result.status, HookStatus::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PostCloneConfig {
            name: "slow".to_string(),
            command: "sleep 5".to_string(),
            timeout_secs: Some(1),
        };
        let action = CommandAction::from_config(&config).unwrap();

        let result = action.act_on_cloned_repo(dir.path()).await;
        assert_eq!(result.status, HookStatus::Error);
        assert!(result.msg.contains("timed out"));
    }
}

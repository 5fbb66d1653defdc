//! Provisioning workflows: setup, update, migrate and clone.
//!
//! Every run follows the same phase sequence:
//!
//! ```text
//! Validating -> Cloning -> { Aborted | Provisioning } -> Pushing -> { Done | DoneWithFailures }
//! ```
//!
//! Validation and cloning happen before the forge is touched, so an invalid
//! input or a failed clone leaves no trace. Master repos are cloned into a
//! scratch [`TempDir`] owned by the run and removed on every exit path.
//! Pushes are best effort: each failure is attributed to its destination and
//! reported, never raised.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{info, warn, Instrument};

use crate::domain::{Issue, MasterRepo, Permission, PushFailure, PushJob, RepoSpec, Team};
use crate::error::{RepomateError, Result};
use crate::forge::{ForgeClient, ForgeError, TeamMap};
use crate::git::{GitError, GitTransport};
use crate::hooks::{HookResult, Registry};
use crate::names::NameCodec;
use crate::obs;
use crate::review::{check_distinct, validate_selection};

/// Team owning migrated master repos.
pub const MASTER_TEAM: &str = "master_repos";

/// Phase of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Validating,
    Cloning,
    /// A clone failed; nothing was changed on the forge.
    Aborted,
    Provisioning,
    Pushing,
    Done,
    /// Finished with at least one failed push.
    DoneWithFailures,
}

impl RunPhase {
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Validating, Cloning)
                | (Cloning, Aborted)
                | (Cloning, Provisioning)
                | (Provisioning, Pushing)
                | (Pushing, Done)
                | (Pushing, DoneWithFailures)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Aborted | RunPhase::Done | RunPhase::DoneWithFailures)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Validating => "validating",
            RunPhase::Cloning => "cloning",
            RunPhase::Aborted => "aborted",
            RunPhase::Provisioning => "provisioning",
            RunPhase::Pushing => "pushing",
            RunPhase::Done => "done",
            RunPhase::DoneWithFailures => "done_with_failures",
        };
        f.write_str(s)
    }
}

/// Phase trail of one run.
#[derive(Debug)]
struct PhaseTracker {
    phases: Vec<RunPhase>,
}

impl PhaseTracker {
    fn start() -> Self {
        obs::emit_phase(&RunPhase::Validating);
        Self {
            phases: vec![RunPhase::Validating],
        }
    }

    fn current(&self) -> RunPhase {
        *self.phases.last().unwrap_or(&RunPhase::Validating)
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal run transition {} -> {}",
            self.current(),
            next
        );
        obs::emit_phase(&next);
        self.phases.push(next);
    }
}

/// Result of a setup, update or migrate run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// Every phase entered, in order. The last one is terminal.
    pub phases: Vec<RunPhase>,
    /// URLs of the repos pushed to.
    pub repo_urls: Vec<String>,
    pub failed_pushes: Vec<PushFailure>,
    /// `team:member` pairs the forge could not resolve.
    pub unresolved_members: Vec<String>,
    /// Repos in which the failure issue was opened.
    pub issues_opened_in: Vec<String>,
    /// Why the failure issue could not be opened. The push failures above
    /// are reported regardless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_error: Option<String>,
}

impl ProvisionReport {
    pub fn outcome(&self) -> Option<RunPhase> {
        self.phases.last().copied().filter(|p| p.is_terminal())
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == Some(RunPhase::Done)
    }
}

/// Result of [`ProvisioningEngine::clone_student_repos`].
#[derive(Debug, Default, Serialize)]
pub struct CloneReport {
    pub cloned: Vec<PathBuf>,
    /// Student repo names with no repository on the forge.
    pub missing: Vec<String>,
    /// Clone URL to failure reason.
    pub failed: BTreeMap<String, String>,
    /// Repo name to post-clone results, in action registration order.
    pub hook_results: BTreeMap<String, Vec<HookResult>>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Branch pushed to student repos.
    pub branch: String,
    /// Directory in which scratch workspaces are created. Defaults to the
    /// system temp dir.
    pub scratch_root: Option<PathBuf>,
    pub private_repos: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            branch: "master".to_string(),
            scratch_root: None,
            private_repos: true,
        }
    }
}

pub struct ProvisioningEngine {
    forge: Arc<dyn ForgeClient>,
    git: Arc<dyn GitTransport>,
    settings: EngineSettings,
}

impl ProvisioningEngine {
    pub fn new(
        forge: Arc<dyn ForgeClient>,
        git: Arc<dyn GitTransport>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            forge,
            git,
            settings,
        }
    }

    /// Create a team and one repo per (master, student) and push the master
    /// contents into it. Safe to re-run: existing teams, members and repos
    /// are kept.
    pub async fn setup(
        &self,
        master_repo_urls: &[String],
        students: &[String],
        actor: &str,
    ) -> Result<ProvisionReport> {
        self.run_setup(master_repo_urls, students, actor)
            .instrument(obs::run_span("setup"))
            .await
    }

    /// Push master contents to existing student repos. When `failure_issue`
    /// is given it is opened in every repo whose push failed.
    pub async fn update(
        &self,
        master_repo_urls: &[String],
        students: &[String],
        actor: &str,
        failure_issue: Option<&Issue>,
    ) -> Result<ProvisionReport> {
        self.run_update(master_repo_urls, students, actor, failure_issue)
            .instrument(obs::run_span("update"))
            .await
    }

    /// Copy repos from arbitrary URLs into the organization, owned by the
    /// [`MASTER_TEAM`] team.
    pub async fn migrate(
        &self,
        master_repo_urls: &[String],
        actor: &str,
    ) -> Result<ProvisionReport> {
        self.run_migrate(master_repo_urls, actor)
            .instrument(obs::run_span("migrate"))
            .await
    }

    /// Clone every student repo of the selection into `dest` and run the
    /// registered post-clone actions on each successful clone.
    pub async fn clone_student_repos(
        &self,
        master_repo_names: &[String],
        students: &[String],
        dest: &Path,
        registry: &Registry,
    ) -> Result<CloneReport> {
        self.run_clone_student_repos(master_repo_names, students, dest, registry)
            .instrument(obs::run_span("clone"))
            .await
    }

    async fn run_setup(
        &self,
        master_repo_urls: &[String],
        students: &[String],
        actor: &str,
    ) -> Result<ProvisionReport> {
        let start = Instant::now();
        let mut tracker = PhaseTracker::start();
        let masters = validate_run(master_repo_urls, students, actor)?;
        obs::emit_run_started("setup", masters.len(), students.len());

        let (_scratch, paths) = self.clone_masters(&mut tracker, master_repo_urls).await?;

        tracker.advance(RunPhase::Provisioning);
        let members: TeamMap = students
            .iter()
            .map(|s| (s.clone(), vec![s.clone()]))
            .collect();
        let teams = self
            .forge
            .ensure_teams_and_members(&members, Permission::Push)
            .await?;
        let unresolved = unresolved_members(&teams, &members);
        let specs = self.repo_specs(&masters, students, &teams)?;
        let repo_urls = self.forge.create_repos(&specs).await?;
        info!(repos = repo_urls.len(), "student repos ensured");

        tracker.advance(RunPhase::Pushing);
        let jobs = push_jobs(&masters, &paths, &repo_urls, &self.settings.branch);
        let failed_pushes = self.git.push(&jobs, actor).await;

        Ok(self.finish("setup", start, tracker, repo_urls, failed_pushes, unresolved, Vec::new()))
    }

    async fn run_update(
        &self,
        master_repo_urls: &[String],
        students: &[String],
        actor: &str,
        failure_issue: Option<&Issue>,
    ) -> Result<ProvisionReport> {
        let start = Instant::now();
        let mut tracker = PhaseTracker::start();
        let masters = validate_run(master_repo_urls, students, actor)?;
        obs::emit_run_started("update", masters.len(), students.len());

        let (_scratch, paths) = self.clone_masters(&mut tracker, master_repo_urls).await?;

        tracker.advance(RunPhase::Provisioning);
        let base_names: Vec<String> = masters.iter().map(|m| m.base_name.clone()).collect();
        let repo_names = NameCodec::student_repo_names(students, &base_names)?;
        let repo_urls = self.forge.get_repo_urls(&repo_names).await?;
        if repo_urls.len() < repo_names.len() {
            warn!(
                expected = repo_names.len(),
                found = repo_urls.len(),
                "some student repos do not exist and will not be updated"
            );
        }

        tracker.advance(RunPhase::Pushing);
        let jobs = push_jobs(&masters, &paths, &repo_urls, &self.settings.branch);
        let failed_pushes = self.git.push(&jobs, actor).await;

        let mut issues_opened_in = Vec::new();
        let mut issue_error = None;
        if let Some(issue) = failure_issue.filter(|_| !failed_pushes.is_empty()) {
            let failed: Vec<String> = failed_pushes
                .iter()
                .map(|f| NameCodec::repo_name_from_url(&f.destination_url))
                .collect();
            match self.forge.open_issue(issue, &failed).await {
                Ok(()) => {
                    info!(repos = failed.len(), title = %issue.title, "opened failure issue");
                    issues_opened_in = failed;
                }
                Err(e) => {
                    warn!(repos = failed.len(), error = %e, "could not open failure issue");
                    issue_error = Some(e.to_string());
                }
            }
        }

        let mut report = self.finish(
            "update",
            start,
            tracker,
            repo_urls,
            failed_pushes,
            Vec::new(),
            issues_opened_in,
        );
        report.issue_error = issue_error;
        Ok(report)
    }

    async fn run_migrate(
        &self,
        master_repo_urls: &[String],
        actor: &str,
    ) -> Result<ProvisionReport> {
        let start = Instant::now();
        let mut tracker = PhaseTracker::start();
        if master_repo_urls.is_empty() {
            return Err(RepomateError::InvalidArgument("no master repo URLs given".to_string()));
        }
        check_actor(actor)?;
        check_distinct("master repo URL", master_repo_urls)?;
        let masters = parse_masters(master_repo_urls)?;
        let mut seen: HashMap<String, &str> = HashMap::new();
        for master in &masters {
            if let Some(first) = seen.insert(master.base_name.to_ascii_lowercase(), &master.url) {
                return Err(RepomateError::NameCollision {
                    name: master.base_name.clone(),
                    first: first.to_string(),
                    second: master.url.clone(),
                });
            }
        }
        obs::emit_run_started("migrate", masters.len(), 0);

        let (_scratch, paths) = self.clone_masters(&mut tracker, master_repo_urls).await?;

        tracker.advance(RunPhase::Provisioning);
        let members = TeamMap::from([(MASTER_TEAM.to_string(), Vec::new())]);
        let teams = self
            .forge
            .ensure_teams_and_members(&members, Permission::Push)
            .await?;
        let team = teams
            .iter()
            .find(|t| t.name == MASTER_TEAM)
            .ok_or_else(|| ForgeError::NotFound(format!("team {MASTER_TEAM}")))?;
        let specs: Vec<RepoSpec> = masters
            .iter()
            .map(|m| RepoSpec {
                name: m.base_name.clone(),
                description: format!("Master repository {}", m.base_name),
                private: self.settings.private_repos,
                team_id: team.id,
            })
            .collect();
        let repo_urls = self.forge.create_repos(&specs).await?;

        tracker.advance(RunPhase::Pushing);
        let jobs: Vec<PushJob> = paths
            .iter()
            .zip(&repo_urls)
            .map(|(path, url)| PushJob {
                local_path: path.clone(),
                repo_url: url.clone(),
                branch: self.settings.branch.clone(),
            })
            .collect();
        let failed_pushes = self.git.push(&jobs, actor).await;

        Ok(self.finish(
            "migrate",
            start,
            tracker,
            repo_urls,
            failed_pushes,
            Vec::new(),
            Vec::new(),
        ))
    }

    async fn run_clone_student_repos(
        &self,
        master_repo_names: &[String],
        students: &[String],
        dest: &Path,
        registry: &Registry,
    ) -> Result<CloneReport> {
        validate_selection(master_repo_names, students)?;
        let repo_names = NameCodec::student_repo_names(students, master_repo_names)?;
        let urls = self.forge.get_repo_urls(&repo_names).await?;

        let found: BTreeSet<String> = urls
            .iter()
            .map(|u| NameCodec::repo_name_from_url(u))
            .collect();
        let mut report = CloneReport {
            missing: repo_names
                .iter()
                .filter(|name| !found.contains(*name))
                .cloned()
                .collect(),
            ..CloneReport::default()
        };
        for name in &report.missing {
            warn!(repo = %name, "student repo not found, skipping");
        }

        tokio::fs::create_dir_all(dest).await?;
        info!(repos = urls.len(), dest = %dest.display(), "cloning student repos");
        for (url, result) in urls.iter().zip(self.git.clone_each(&urls, dest).await) {
            match result {
                Ok(path) => report.cloned.push(path),
                Err(e) => {
                    warn!(url = %url, error = %e, "clone failed");
                    report.failed.insert(url.clone(), e.to_string());
                }
            }
        }

        if registry.has_post_clone_actions() {
            for path in &report.cloned {
                let results = registry.run_post_clone(path).await;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                report.hook_results.insert(name, results);
            }
        }
        Ok(report)
    }

    /// Clone all master repos into a fresh scratch workspace. On failure the
    /// run is aborted and the workspace removed before returning.
    async fn clone_masters(
        &self,
        tracker: &mut PhaseTracker,
        urls: &[String],
    ) -> Result<(TempDir, Vec<PathBuf>)> {
        tracker.advance(RunPhase::Cloning);
        let scratch = self.scratch()?;
        match self.git.clone_all(urls, scratch.path()).await {
            Ok(paths) => Ok((scratch, paths)),
            Err(e) => {
                tracker.advance(RunPhase::Aborted);
                let (url, reason) = match e {
                    GitError::Clone { url, reason } => (url, reason),
                    other => (String::new(), other.to_string()),
                };
                warn!(url = %url, reason = %reason, "clone failed, aborting run");
                Err(RepomateError::CloneFailed { url, reason })
            }
        }
    }

    fn scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("repomate-");
        let dir = match &self.settings.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn repo_specs(
        &self,
        masters: &[MasterRepo],
        students: &[String],
        teams: &[Team],
    ) -> Result<Vec<RepoSpec>> {
        let by_name: HashMap<&str, &Team> = teams.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut specs = Vec::with_capacity(masters.len() * students.len());
        for master in masters {
            for student in students {
                let team = by_name
                    .get(student.as_str())
                    .ok_or_else(|| ForgeError::NotFound(format!("team {student}")))?;
                specs.push(RepoSpec {
                    name: NameCodec::join_repo(student, &master.base_name),
                    description: format!("{} created for {}", master.base_name, student),
                    private: self.settings.private_repos,
                    team_id: team.id,
                });
            }
        }
        Ok(specs)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        operation: &str,
        start: Instant,
        mut tracker: PhaseTracker,
        repo_urls: Vec<String>,
        failed_pushes: Vec<PushFailure>,
        unresolved_members: Vec<String>,
        issues_opened_in: Vec<String>,
    ) -> ProvisionReport {
        obs::emit_push_failures(&failed_pushes);
        tracker.advance(if failed_pushes.is_empty() {
            RunPhase::Done
        } else {
            RunPhase::DoneWithFailures
        });
        obs::emit_run_finished(
            operation,
            start.elapsed().as_millis() as u64,
            failed_pushes.len(),
        );
        ProvisionReport {
            phases: tracker.phases,
            repo_urls,
            failed_pushes,
            unresolved_members,
            issues_opened_in,
            issue_error: None,
        }
    }
}

/// One job per (master, student repo) pair whose repo name derives from the
/// master's base name. Matching is structural, never by suffix.
pub fn push_jobs(
    masters: &[MasterRepo],
    local_paths: &[PathBuf],
    repo_urls: &[String],
    branch: &str,
) -> Vec<PushJob> {
    let mut jobs = Vec::new();
    for (master, path) in masters.iter().zip(local_paths) {
        for url in repo_urls {
            let name = NameCodec::repo_name_from_url(url);
            let derived = NameCodec::parse_student_repo_name(&name)
                .map(|(_, base)| base == master.base_name)
                .unwrap_or(false);
            if derived {
                jobs.push(PushJob {
                    local_path: path.clone(),
                    repo_url: url.clone(),
                    branch: branch.to_string(),
                });
            }
        }
    }
    jobs
}

fn check_actor(actor: &str) -> Result<()> {
    if actor.trim().is_empty() {
        return Err(RepomateError::InvalidArgument("acting user is empty".to_string()));
    }
    Ok(())
}

fn parse_masters(urls: &[String]) -> Result<Vec<MasterRepo>> {
    urls.iter().map(|url| MasterRepo::parse(url)).collect()
}

/// Everything setup and update check before any side effect.
fn validate_run(
    master_repo_urls: &[String],
    students: &[String],
    actor: &str,
) -> Result<Vec<MasterRepo>> {
    if master_repo_urls.is_empty() {
        return Err(RepomateError::InvalidArgument("no master repo URLs given".to_string()));
    }
    if students.is_empty() {
        return Err(RepomateError::InvalidArgument("no students given".to_string()));
    }
    check_actor(actor)?;
    check_distinct("master repo URL", master_repo_urls)?;
    check_distinct("student", students)?;
    let masters = parse_masters(master_repo_urls)?;
    let pairs: Vec<(String, String)> = masters
        .iter()
        .map(|m| (m.url.clone(), m.base_name.clone()))
        .collect();
    NameCodec::check_collisions(students, &pairs)?;
    Ok(masters)
}

fn unresolved_members(teams: &[Team], requested: &TeamMap) -> Vec<String> {
    let mut unresolved = Vec::new();
    for team in teams {
        if let Some(members) = requested.get(&team.name) {
            for member in team.missing_members(members) {
                obs::emit_unresolved_member(&team.name, member);
                unresolved.push(format!("{}:{member}", team.name));
            }
        }
    }
    unresolved
}

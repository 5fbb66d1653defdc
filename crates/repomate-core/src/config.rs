//! Configuration file and environment.
//!
//! The file is TOML; every key is optional. The OAuth token is only ever read
//! from `REPOMATE_OAUTH` so it never ends up on disk next to the config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the forge OAuth token.
pub const TOKEN_ENV: &str = "REPOMATE_OAUTH";

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "REPOMATE_CONFIG";

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Command run inside every freshly cloned student repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCloneConfig {
    pub name: String,
    /// Program and arguments, whitespace separated.
    pub command: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API root, e.g. `https://github.example.edu/api/v3` for an
    /// enterprise installation.
    pub github_base_url: String,
    pub org_name: Option<String>,
    /// Account used to push and to open issues.
    pub user: Option<String>,
    pub students_file: Option<PathBuf>,
    pub default_branch: String,
    pub concurrency: usize,
    pub push_retries: usize,
    pub private_repos: bool,
    /// Seed for review allocation. Unseeded allocations follow input order.
    pub review_seed: Option<String>,
    pub post_clone: Vec<PostCloneConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_base_url: DEFAULT_BASE_URL.to_string(),
            org_name: None,
            user: None,
            students_file: None,
            default_branch: "master".to_string(),
            concurrency: 8,
            push_retries: 3,
            private_repos: true,
            review_seed: None,
            post_clone: Vec::new(),
        }
    }
}

impl Config {
    /// Resolve the config path: explicit path, then `$REPOMATE_CONFIG`, then
    /// `<config dir>/repomate/config.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("repomate").join("config.toml"))
    }

    /// Load the config. An explicitly named file must exist; a missing file
    /// at the default location yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_path(explicit) else {
            return Ok(Self::default());
        };
        if explicit.is_none() && !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Token from the environment, if set and non-empty.
    pub fn token() -> Option<String> {
        std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Parse a students file: one username per line, blank lines and `#`
/// comments ignored.
pub fn parse_students(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_students(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read students file: {}", path.display()))?;
    Ok(parse_students(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.github_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.default_branch, "master");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.push_retries, 3);
        assert!(config.private_repos);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
github_base_url = "https://github.example.edu/api/v3"
org_name = "course-2026"
user = "ta1"
students_file = "students.txt"
default_branch = "main"
concurrency = 4
private_repos = false
review_seed = "fall"

[[post_clone]]
name = "tests"
command = "make test"
timeout_secs = 60

[[post_clone]]
name = "lint"
command = "make lint"
"#,
        )
        .unwrap();

        assert_eq!(config.org_name.as_deref(), Some("course-2026"));
        assert_eq!(config.user.as_deref(), Some("ta1"));
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.push_retries, 3);
        assert!(!config.private_repos);
        assert_eq!(config.review_seed.as_deref(), Some("fall"));
        assert_eq!(config.post_clone.len(), 2);
        assert_eq!(config.post_clone[0].timeout_secs, Some(60));
        assert_eq!(config.post_clone[1].timeout_secs, None);
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        assert!(Config::parse("concurrency = \"many\"").is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "org_name = \"lab\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.org_name.as_deref(), Some("lab"));
    }

    #[test]
    fn test_config_survives_toml_roundtrip() {
        let mut config = Config::default();
        config.org_name = Some("lab".to_string());
        config.post_clone.push(PostCloneConfig {
            name: "build".to_string(),
            command: "cargo build".to_string(),
            timeout_secs: Some(30),
        });
        let parsed = Config::parse(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parse_students_skips_comments_and_blanks() {
        let students = parse_students("alice\n\n# staff below\nbob  # repeating\n  carol\n");
        assert_eq!(students, vec!["alice", "bob", "carol"]);
    }
}

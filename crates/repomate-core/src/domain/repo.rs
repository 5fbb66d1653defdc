use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::names::NameCodec;

/// A template repository identified by its source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterRepo {
    pub url: String,
    /// Last path segment of `url`, without a `.git` suffix.
    pub base_name: String,
}

impl MasterRepo {
    /// Parse a master repo URL, validating its base name against the
    /// forge naming rules.
    pub fn parse(url: &str) -> Result<Self> {
        let base_name = NameCodec::repo_name_from_url(url);
        NameCodec::validate_master_name(&base_name)?;
        Ok(Self {
            url: url.to_string(),
            base_name,
        })
    }
}

/// Description of a repository to create on the forge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSpec {
    pub name: String,
    pub description: String,
    pub private: bool,
    /// Id of the team that owns the repository (push access).
    pub team_id: u64,
}

/// Push the contents of a local clone to a remote branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushJob {
    pub local_path: PathBuf,
    pub repo_url: String,
    pub branch: String,
}

/// A push that did not succeed after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFailure {
    pub destination_url: String,
    pub reason: String,
}

impl std::fmt::Display for PushFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.destination_url, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_repo_parse_strips_git_suffix() {
        let repo = MasterRepo::parse("https://github.com/course/lab-1.git").unwrap();
        assert_eq!(repo.base_name, "lab-1");
        assert_eq!(repo.url, "https://github.com/course/lab-1.git");
    }

    #[test]
    fn test_master_repo_parse_rejects_double_hyphen() {
        assert!(MasterRepo::parse("https://github.com/course/lab--1").is_err());
    }

    #[test]
    fn test_push_failure_display() {
        let failure = PushFailure {
            destination_url: "https://host/org/alice--lab1".to_string(),
            reason: "rejected".to_string(),
        };
        assert_eq!(failure.to_string(), "https://host/org/alice--lab1: rejected");
    }
}

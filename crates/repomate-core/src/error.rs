//! Error taxonomy for the orchestration engine.
//!
//! Argument and name errors are raised before any side effect. Clone
//! failures abort a run before the forge is touched. Push failures are not
//! errors at all: they are collected as [`crate::domain::PushFailure`] values.

use crate::forge::ForgeError;
use crate::git::GitError;

/// Errors produced by the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum RepomateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("name collision: '{name}' is derived from both {first} and {second}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("failed to clone {url}: {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("review allocation for '{master_repo}' violates its contract: {reason}")]
    AllocationInvariant { master_repo: String, reason: String },

    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepomateError {
    pub(crate) fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RepomateError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, RepomateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_name_display() {
        let err = RepomateError::invalid_name("a--b", "contains '--'");
        let msg = err.to_string();
        assert!(msg.contains("invalid name"));
        assert!(msg.contains("a--b"));
        assert!(msg.contains("contains '--'"));
    }

    #[test]
    fn test_name_collision_displays_both_sources() {
        let err = RepomateError::NameCollision {
            name: "alice--lab1".to_string(),
            first: "https://host/org-a/lab1".to_string(),
            second: "https://host/org-b/lab1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice--lab1"));
        assert!(msg.contains("org-a"));
        assert!(msg.contains("org-b"));
    }

    #[test]
    fn test_allocation_invariant_display() {
        let err = RepomateError::AllocationInvariant {
            master_repo: "lab1".to_string(),
            reason: "alice reviews their own repo".to_string(),
        };
        assert!(err.to_string().contains("lab1"));
        assert!(err.to_string().contains("own repo"));
    }

    #[test]
    fn test_forge_error_converts() {
        let err: RepomateError = ForgeError::NotFound("team x".to_string()).into();
        assert!(matches!(err, RepomateError::Forge(_)));
        assert!(err.to_string().contains("team x"));
    }
}

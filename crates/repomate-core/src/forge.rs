//! Forge capability: teams, repositories, issues and access grants.
//!
//! Every mutating method is idempotent: ensuring an existing team unions its
//! members, creating an existing repo returns its URL, deleting a missing team
//! does nothing. An in-memory implementation lives in [`crate::fakes`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::domain::{Issue, IssueRecord, IssueState, Permission, RepoSpec, Review, Team};

/// Errors reported by a forge client.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Transport-level failure (connection, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The forge answered with an unexpected status.
    #[error("forge API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// A required entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A response body could not be decoded.
    #[error("failed to decode forge response: {0}")]
    Decode(String),

    /// The client is misconfigured (missing token, bad base URL).
    #[error("forge client misconfigured: {0}")]
    Config(String),
}

/// Result type for forge operations.
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Mapping from team name to the names (members or repos) attached to it.
pub type TeamMap = BTreeMap<String, Vec<String>>;

/// Abstract hosted-forge API.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Ensure each team exists and contains the listed members, granting the
    /// team `permission` on repos later attached to it. Members are only ever
    /// added. Usernames the forge cannot resolve are skipped; the returned
    /// teams list the members actually present.
    async fn ensure_teams_and_members(
        &self,
        members: &TeamMap,
        permission: Permission,
    ) -> ForgeResult<Vec<Team>>;

    /// Create repositories, returning one URL per spec in input order.
    /// Specs whose name already exists are left untouched and their
    /// existing URL is returned.
    async fn create_repos(&self, repos: &[RepoSpec]) -> ForgeResult<Vec<String>>;

    /// URLs of the named repositories. Names with no matching repository are
    /// skipped, so the result may be shorter than the input.
    async fn get_repo_urls(&self, names: &[String]) -> ForgeResult<Vec<String>>;

    /// Open `issue` in every named repository.
    async fn open_issue(&self, issue: &Issue, repo_names: &[String]) -> ForgeResult<()>;

    /// Close every open issue whose title matches `title_regex`.
    async fn close_issue(&self, title_regex: &Regex, repo_names: &[String]) -> ForgeResult<()>;

    /// Issues in `repo_name` in `state` whose title matches `title_regex`.
    /// Returns [`ForgeError::NotFound`] if the repository does not exist.
    async fn get_issues(
        &self,
        repo_name: &str,
        state: IssueState,
        title_regex: &Regex,
    ) -> ForgeResult<Vec<IssueRecord>>;

    /// Delete the named teams. Missing teams are ignored.
    async fn delete_teams(&self, names: &[String]) -> ForgeResult<()>;

    /// Grant each review team pull access to its repositories. When `issue`
    /// is given it is opened in each repository and assigned to the team's
    /// members.
    async fn add_repos_to_review_teams(
        &self,
        team_repos: &TeamMap,
        issue: Option<&Issue>,
    ) -> ForgeResult<()>;

    /// For each review team, whether each member listed in `students` has
    /// opened an issue matching `title_regex` in the team's repository.
    /// Keyed by reviewer.
    async fn get_review_progress(
        &self,
        team_names: &[String],
        students: &[String],
        title_regex: &Regex,
    ) -> ForgeResult<BTreeMap<String, Vec<Review>>>;
}

//! Wire types for the subset of the GitHub REST API repomate uses.

use chrono::{DateTime, Utc};
use repomate_core::{IssueRecord, IssueState, Permission};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct TeamJson {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserJson {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoJson {
    pub name: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueJson {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub user: UserJson,
    pub created_at: DateTime<Utc>,
    pub state: String,
    /// Present when the "issue" is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl IssueJson {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn into_record(self) -> IssueRecord {
        let state = if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        };
        IssueRecord {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.login,
            created_at: self.created_at,
            state,
        }
    }
}

/// Error body returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorJson {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTeam<'a> {
    pub name: &'a str,
    pub privacy: &'static str,
    /// Default permission on repos added to the team.
    pub permission: Permission,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRepo<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub private: bool,
    pub team_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateIssue<'a> {
    pub title: &'a str,
    pub body: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub assignees: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateIssueState {
    pub state: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantPermission {
    pub permission: Permission,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE: &str = r#"{
        "number": 7,
        "title": "Peer review",
        "body": null,
        "user": {"login": "ta1"},
        "created_at": "2026-03-01T12:00:00Z",
        "state": "closed"
    }"#;

    #[test]
    fn test_issue_into_record() {
        let issue: IssueJson = serde_json::from_str(ISSUE).unwrap();
        assert!(!issue.is_pull_request());
        let record = issue.into_record();
        assert_eq!(record.number, 7);
        assert_eq!(record.author, "ta1");
        assert_eq!(record.body, "");
        assert_eq!(record.state, IssueState::Closed);
    }

    #[test]
    fn test_pull_request_is_detected() {
        let json = ISSUE.replace(
            r#""state": "closed""#,
            r#""state": "open", "pull_request": {"url": "https://api.github.com/x"}"#,
        );
        let issue: IssueJson = serde_json::from_str(&json).unwrap();
        assert!(issue.is_pull_request());
    }

    #[test]
    fn test_create_issue_omits_empty_assignees() {
        let body = serde_json::to_value(CreateIssue {
            title: "t",
            body: "b",
            assignees: &[],
        })
        .unwrap();
        assert!(body.get("assignees").is_none());
    }

    #[test]
    fn test_permission_serializes_lowercase() {
        let body = serde_json::to_value(GrantPermission {
            permission: Permission::Pull,
        })
        .unwrap();
        assert_eq!(body["permission"], "pull");
    }
}

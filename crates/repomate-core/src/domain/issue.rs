use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue to open: title and body only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    pub body: String,
}

impl Issue {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Parse issue file contents: the first line is the title, everything
    /// after it is the body.
    pub fn from_text(text: &str) -> Option<Self> {
        let mut lines = text.splitn(2, '\n');
        let title = lines.next()?.trim();
        if title.is_empty() {
            return None;
        }
        let body = lines.next().unwrap_or("").trim_start_matches('\n');
        Some(Self::new(title, body))
    }
}

/// Issue state filter and observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
    All,
}

impl IssueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
            IssueState::All => "all",
        }
    }

    /// True if an issue in state `observed` passes this filter.
    pub fn admits(&self, observed: IssueState) -> bool {
        matches!(self, IssueState::All) || *self == observed
    }
}

impl std::str::FromStr for IssueState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(IssueState::Open),
            "closed" => Ok(IssueState::Closed),
            "all" => Ok(IssueState::All),
            other => Err(format!("unknown issue state: {other}")),
        }
    }
}

/// An issue as observed on the forge. `number`, `author` and `created_at`
/// are assigned by the forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub state: IssueState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_from_text_splits_title_and_body() {
        let issue = Issue::from_text("Push failed\n\nPlease contact your TA.\n").unwrap();
        assert_eq!(issue.title, "Push failed");
        assert_eq!(issue.body, "Please contact your TA.\n");
    }

    #[test]
    fn test_issue_from_text_title_only() {
        let issue = Issue::from_text("Only a title").unwrap();
        assert_eq!(issue.title, "Only a title");
        assert_eq!(issue.body, "");
    }

    #[test]
    fn test_issue_from_text_rejects_empty_title() {
        assert!(Issue::from_text("\nbody").is_none());
        assert!(Issue::from_text("").is_none());
    }

    #[test]
    fn test_issue_state_admits() {
        assert!(IssueState::All.admits(IssueState::Closed));
        assert!(IssueState::Open.admits(IssueState::Open));
        assert!(!IssueState::Open.admits(IssueState::Closed));
    }

    #[test]
    fn test_issue_state_from_str() {
        assert_eq!("CLOSED".parse::<IssueState>().unwrap(), IssueState::Closed);
        assert!("pending".parse::<IssueState>().is_err());
    }
}

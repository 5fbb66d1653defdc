use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Access level a team holds on the repositories granted to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read-only access. Review teams use this.
    Pull,
    /// Read/write access. Student teams use this.
    Push,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Pull => "pull",
            Permission::Push => "push",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forge team as observed after an ensure call.
///
/// `members` only holds accounts the forge could resolve; requested members
/// that are missing here were skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub id: u64,
    pub members: BTreeSet<String>,
}

impl Team {
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self {
            name: name.into(),
            id,
            members: BTreeSet::new(),
        }
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members.extend(members.into_iter().map(Into::into));
        self
    }

    /// Requested members the forge did not add to this team.
    pub fn missing_members<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|m| !self.members.contains(m.as_str()))
            .map(String::as_str)
            .collect()
    }
}

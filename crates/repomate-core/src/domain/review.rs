use serde::{Deserialize, Serialize};

/// One assigned review: the repo under review and whether the reviewer has
/// opened a matching issue in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Review {
    pub repo: String,
    pub done: bool,
}

impl Review {
    pub fn new(repo: impl Into<String>, done: bool) -> Self {
        Self {
            repo: repo.into(),
            done,
        }
    }
}

//! Value records shared by the engine, the forge and the git transport.
//!
//! - `Team`, `Permission`: ownership and review teams
//! - `MasterRepo`, `RepoSpec`, `PushJob`, `PushFailure`: repository fan-out
//! - `Issue`, `IssueRecord`, `IssueState`: issue values
//! - `Review`: peer review progress entries

pub mod issue;
pub mod repo;
pub mod review;
pub mod team;

pub use issue::{Issue, IssueRecord, IssueState};
pub use repo::{MasterRepo, PushFailure, PushJob, RepoSpec};
pub use review::Review;
pub use team::{Permission, Team};

//! repomate core library
//!
//! Batch orchestration for per-student repositories and peer review teams.
//! The forge and git are reached only through the [`ForgeClient`] and
//! [`GitTransport`] traits.

pub mod config;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod forge;
pub mod git;
pub mod hooks;
pub mod issues;
pub mod names;
pub mod obs;
pub mod provision;
pub mod review;
pub mod telemetry;

pub use config::{parse_students, read_students, Config, PostCloneConfig};

pub use domain::{
    Issue, IssueRecord, IssueState, MasterRepo, Permission, PushFailure, PushJob, RepoSpec,
    Review, Team,
};

pub use error::{RepomateError, Result};

pub use forge::{ForgeClient, ForgeError, ForgeResult, TeamMap};

pub use git::{is_git_repo, CliGitTransport, GitError, GitResult, GitTransport};

pub use hooks::{CommandAction, HookResult, HookStatus, PostCloneAction, Registry};

pub use issues::{format_listing, limit_line_length, IssueQuery, IssueReporter, RepoIssues};

pub use names::NameCodec;

pub use provision::{
    push_jobs, CloneReport, EngineSettings, ProvisionReport, ProvisioningEngine, RunPhase,
    MASTER_TEAM,
};

pub use review::{
    validate_allocation, Allocation, AllocationRequest, AssignReport, ProgressRow,
    ReviewAllocationStrategy, ReviewAllocator, ReviewProgress, RoundRobinStrategy,
};

pub use telemetry::init_tracing;

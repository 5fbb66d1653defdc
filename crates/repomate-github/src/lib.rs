//! GitHub backend for repomate.
//!
//! [`GitHubForge`] implements [`repomate_core::ForgeClient`] against the
//! GitHub REST API (github.com or an enterprise installation).

pub mod client;
pub mod types;

pub use client::{GitHubConfig, GitHubForge};

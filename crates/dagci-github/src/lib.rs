//! dagci-github: GitHub REST access for dagci jobs
//!
//! Wraps the handful of endpoints the deploy poller and the PR validator
//! consume behind the [`SourceHost`] trait:
//!
//! - `GET /repos/{owner}/{repo}/commits/{branch}`
//! - `GET /repos/{owner}/{repo}/pulls/{n}` and `.../files`
//! - `GET /repos/{owner}/{repo}/zipball/{branch}`
//! - raw file downloads via each file's `raw_url`
//!
//! ## Layer 1 - Remote Sources

pub mod client;
pub mod config;
pub mod error;
pub mod fakes;
pub mod host;
pub mod models;

pub use client::GitHubClient;
pub use config::{GitHubConfig, DEFAULT_API_BASE};
pub use error::GitHubError;
pub use host::SourceHost;
pub use models::{BranchRef, ChangedFile, CommitRef, FileStatus, PullRequest};

/// Result type for dagci-github operations
pub type Result<T> = std::result::Result<T, GitHubError>;

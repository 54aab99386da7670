//! Error types for the validation pipeline.

use dagci_core::ProcessError;
use dagci_github::GitHubError;
use thiserror::Error;

use crate::stage::Stage;

/// Failure while assembling the workspace tree.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch pull request metadata: {0}")]
    Metadata(#[source] GitHubError),

    #[error("failed to download archive of {branch}: {source}")]
    Archive {
        branch: String,
        #[source]
        source: GitHubError,
    },

    #[error("archive is not a readable zip: {0}")]
    InvalidArchive(String),

    #[error("archive has no single root directory ({entries} top-level entries)")]
    EmptyArchive { entries: usize },

    #[error("failed to download {path}: {source}")]
    File {
        path: String,
        #[source]
        source: GitHubError,
    },

    #[error("{path} has no raw content URL")]
    MissingRawUrl { path: String },

    #[error("refusing to write outside the workspace: {path}")]
    UnsafePath { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while building the dependency environment.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("'{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("metadata store initialization failed: {stderr}")]
    MetadataStore { stderr: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Terminal outcome of a validation run other than success or skip.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("another validation of PR #{pr_number} holds {lock}")]
    Locked { pr_number: u64, lock: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("{stage} check failed for {failed} file(s)")]
    CheckFailure { stage: Stage, failed: usize },

    #[error("validation backend error: {0}")]
    Backend(#[from] ProcessError),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl ValidationError {
    /// Whether this is a check verdict rather than an infrastructure failure.
    pub fn is_check_failure(&self) -> bool {
        matches!(self, ValidationError::CheckFailure { .. })
    }
}

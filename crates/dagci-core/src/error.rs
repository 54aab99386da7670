//! Error taxonomy for the auto-deploy job.

use dagci_github::GitHubError;
use dagci_state::StorageError;

use crate::process::ProcessError;

/// Errors produced by [`crate::deploy::DeployJob`].
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no new commit on '{branch}' within {waited_secs}s")]
    SensorTimeout { branch: String, waited_secs: u64 },

    #[error("package update failed (exit code {exit_code}): {stderr}")]
    InstallFailed { exit_code: i32, stderr: String },

    #[error("package update could not run: {0}")]
    Process(#[from] ProcessError),

    #[error("source host error: {0}")]
    Source(#[from] GitHubError),

    #[error("state store error: {0}")]
    Storage(#[from] StorageError),
}

impl DeployError {
    /// Whether a second attempt of the same step could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployError::InstallFailed { .. } | DeployError::Process(ProcessError::Timeout { .. })
        )
    }
}

/// Result type for deploy operations.
pub type Result<T> = std::result::Result<T, DeployError>;

//! Error types for dagci-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Compare-and-swap precondition did not hold
    #[error("conflicting update for key '{key}': expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Keys must be non-empty
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Backing file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file contents are not a JSON object of strings
    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

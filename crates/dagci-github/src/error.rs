//! Error types for dagci-github

use thiserror::Error;

/// Errors that can occur while talking to the code-hosting API
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout)
    #[error("HTTP request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Request timed out
    #[error("HTTP request to {url} timed out")]
    Timeout { url: String },

    /// Non-success status code
    #[error("GitHub returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Unauthenticated or token quota exhausted
    #[error("GitHub rate limit exceeded for {url} (resets at {reset_at:?})")]
    RateLimited { url: String, reset_at: Option<u64> },

    /// Response body did not match the expected schema
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Client could not be constructed
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl GitHubError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GitHubError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            GitHubError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            GitHubError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// HTTP status associated with this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

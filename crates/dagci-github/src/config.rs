//! GitHub client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// GitHub client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base URL
    pub api_base: String,
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Access token (optional; unauthenticated rate limits apply without it)
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Timeout for the latest-commit lookup
    pub commit_timeout_secs: u64,
    /// Timeout for pull request metadata and file listings
    pub metadata_timeout_secs: u64,
    /// Timeout for individual raw file downloads
    pub file_timeout_secs: u64,
    /// Timeout for branch archive downloads
    pub archive_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_base: std::env::var("DAGCI_GITHUB_API")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            owner: std::env::var("DAGCI_GITHUB_OWNER").unwrap_or_else(|_| "colav".to_string()),
            repo: std::env::var("DAGCI_GITHUB_REPO")
                .unwrap_or_else(|_| "impactu_airflow".to_string()),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
            commit_timeout_secs: 10,
            metadata_timeout_secs: 30,
            file_timeout_secs: 30,
            archive_timeout_secs: 60,
        }
    }
}

impl GitHubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific repository on the public API
    pub fn new(owner: &str, repo: &str) -> Self {
        GitHubConfig {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
            commit_timeout_secs: 10,
            metadata_timeout_secs: 30,
            file_timeout_secs: 30,
            archive_timeout_secs: 60,
        }
    }

    /// Set authentication token. Empty tokens are ignored.
    pub fn with_token(mut self, token: &str) -> Self {
        if !token.trim().is_empty() {
            self.token = Some(token.trim().to_string());
        }
        self
    }

    /// Point the client at a different API host (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    /// `{api_base}/repos/{owner}/{repo}` without a trailing slash.
    pub fn repo_api_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    /// HTTPS clone URL, suitable for `pip install git+<url>@<branch>`.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    /// `owner/repo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub(crate) fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }

    pub(crate) fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub(crate) fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    pub(crate) fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }
}

//! reqwest-backed GitHub REST client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GitHubConfig;
use crate::error::GitHubError;
use crate::host::SourceHost;
use crate::models::{ChangedFile, CommitRef, PullRequest};
use crate::Result;

/// Page size requested from list endpoints (GitHub maximum).
pub const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for one listing (GitHub caps PR files at 3000).
const MAX_PAGES: usize = 30;

const USER_AGENT: &str = concat!("dagci/", env!("CARGO_PKG_VERSION"));

/// GitHub client for one repository
#[derive(Clone)]
pub struct GitHubClient {
    config: GitHubConfig,
    http_client: reqwest::Client,
}

impl GitHubClient {
    /// Create a new GitHub client
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| GitHubError::Config(e.to_string()))?;

        Ok(GitHubClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GitHubConfig::from_env())
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Same client authenticating with `token`. The connection pool is shared.
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            config: self.config.clone().with_token(token),
            http_client: self.http_client.clone(),
        }
    }

    fn request(&self, url: &str, timeout: Duration) -> RequestBuilder {
        let mut request = self.http_client.get(url).timeout(timeout);
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }
        request
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        debug!(url = %url, "GET");
        let response = request
            .send()
            .await
            .map_err(|e| GitHubError::from_reqwest(url, e))?;
        check_status(url, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> Result<T> {
        let response = self.send(url, self.request(url, timeout)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GitHubError::from_reqwest(url, e))
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let response = self.send(url, self.request(url, timeout)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GitHubError::from_reqwest(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn latest_commit(&self, branch: &str) -> Result<String> {
        let url = format!("{}/commits/{}", self.config.repo_api_url(), branch);
        let commit: CommitRef = self.get_json(&url, self.config.commit_timeout()).await?;
        Ok(commit.sha)
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest> {
        let url = format!("{}/pulls/{}", self.config.repo_api_url(), number);
        self.get_json(&url, self.config.metadata_timeout()).await
    }

    async fn pull_request_files(&self, number: u64) -> Result<Vec<ChangedFile>> {
        let url = format!("{}/pulls/{}/files", self.config.repo_api_url(), number);
        let url = url.as_str();

        let files = collect_pages(|page| {
            let request = self
                .request(url, self.config.metadata_timeout())
                .query(&[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())]);
            async move {
                let response = self.send(url, request).await?;
                response
                    .json::<Vec<ChangedFile>>()
                    .await
                    .map_err(|e| GitHubError::from_reqwest(url, e))
            }
        })
        .await?;

        info!(pr_number = number, files = files.len(), "Fetched changed files");
        Ok(files)
    }

    async fn download_archive(&self, branch: &str) -> Result<Vec<u8>> {
        let url = format!("{}/zipball/{}", self.config.repo_api_url(), branch);
        info!(branch = %branch, "Downloading branch archive");
        self.get_bytes(&url, self.config.archive_timeout()).await
    }

    async fn download_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url, self.config.file_timeout()).await
    }

    fn authenticated(&self, token: &str) -> Arc<dyn SourceHost> {
        Arc::new(self.with_token(token))
    }
}

/// Fetch pages 1, 2, ... until a short page, concatenating their items.
/// Stops after [`MAX_PAGES`].
async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items = Vec::new();
    for page in 1..=MAX_PAGES {
        let batch = fetch_page(page).await?;
        let fetched = batch.len();
        items.extend(batch);
        if is_last_page(fetched) {
            break;
        }
    }
    Ok(items)
}

/// A short page marks the end of a paginated listing.
fn is_last_page(fetched: usize) -> bool {
    fetched < PAGE_SIZE
}

async fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if is_rate_limited(status, response.headers()) {
        let reset_at = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        return Err(GitHubError::RateLimited {
            url: url.to_string(),
            reset_at,
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP {status}"));
    Err(GitHubError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        body,
    })
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
}

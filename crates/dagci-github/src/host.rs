//! Source host abstraction.
//!
//! Both jobs talk to the code-hosting service only through this trait so they
//! can be exercised against [`crate::fakes::FakeSourceHost`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{ChangedFile, PullRequest};
use crate::Result;

/// Read-only view of a hosted repository.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// SHA of the tip commit of `branch`.
    async fn latest_commit(&self, branch: &str) -> Result<String>;

    /// Pull request metadata.
    async fn pull_request(&self, number: u64) -> Result<PullRequest>;

    /// Every changed file of a pull request, in API order.
    async fn pull_request_files(&self, number: u64) -> Result<Vec<ChangedFile>>;

    /// Zip archive of the tree at the tip of `branch`.
    async fn download_archive(&self, branch: &str) -> Result<Vec<u8>>;

    /// Raw bytes behind a file's `raw_url`.
    async fn download_raw(&self, url: &str) -> Result<Vec<u8>>;

    /// A view of the same repository that authenticates with `token`.
    fn authenticated(&self, token: &str) -> Arc<dyn SourceHost>;
}

//! In-memory source host (testing only)
//!
//! `FakeSourceHost` serves canned commits, pull requests, archives and raw
//! files, and records every call so tests can assert on traffic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::GitHubError;
use crate::host::SourceHost;
use crate::models::{BranchRef, ChangedFile, PullRequest};
use crate::Result;

#[derive(Debug, Default)]
struct FakeState {
    commits: HashMap<String, String>,
    pulls: HashMap<u64, (PullRequest, Vec<ChangedFile>)>,
    archives: HashMap<String, Vec<u8>>,
    raw: HashMap<String, Vec<u8>>,
    calls: Vec<(Option<String>, String)>,
}

/// Scriptable `SourceHost`.
///
/// Views returned by [`SourceHost::authenticated`] share the canned data and
/// the call log, and tag their calls with the token they carry.
#[derive(Debug, Default)]
pub struct FakeSourceHost {
    state: Arc<Mutex<FakeState>>,
    token: Option<String>,
}

impl FakeSourceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tip commit of a branch.
    pub fn set_commit(&self, branch: &str, sha: &str) {
        let mut state = self.state.lock().unwrap();
        state.commits.insert(branch.to_string(), sha.to_string());
    }

    /// Register a pull request with its changed files.
    pub fn add_pull(&self, number: u64, base: &str, head: &str, files: Vec<ChangedFile>) {
        let pr = PullRequest {
            number,
            title: format!("PR #{number}"),
            base: BranchRef {
                name: base.to_string(),
                sha: None,
            },
            head: BranchRef {
                name: head.to_string(),
                sha: None,
            },
        };
        let mut state = self.state.lock().unwrap();
        state.pulls.insert(number, (pr, files));
    }

    /// Serve `bytes` as the zipball of `branch`.
    pub fn set_archive(&self, branch: &str, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.archives.insert(branch.to_string(), bytes);
    }

    /// Serve `bytes` at `url`.
    pub fn set_raw(&self, url: &str, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.raw.insert(url.to_string(), bytes.to_vec());
    }

    /// Calls made so far, e.g. `"latest_commit main"`.
    pub fn calls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.calls.iter().map(|(_, call)| call.clone()).collect()
    }

    /// Calls made so far with the token of the view that made them.
    pub fn calls_with_tokens(&self) -> Vec<(Option<String>, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        let mut state = self.state.lock().unwrap();
        state.calls.push((self.token.clone(), call));
    }
}

fn not_found(url: String) -> GitHubError {
    GitHubError::Status {
        status: 404,
        url,
        body: "Not Found".to_string(),
    }
}

#[async_trait]
impl SourceHost for FakeSourceHost {
    async fn latest_commit(&self, branch: &str) -> Result<String> {
        self.record(format!("latest_commit {branch}"));
        let state = self.state.lock().unwrap();
        state
            .commits
            .get(branch)
            .cloned()
            .ok_or_else(|| not_found(format!("commits/{branch}")))
    }

    async fn pull_request(&self, number: u64) -> Result<PullRequest> {
        self.record(format!("pull_request {number}"));
        let state = self.state.lock().unwrap();
        state
            .pulls
            .get(&number)
            .map(|(pr, _)| pr.clone())
            .ok_or_else(|| not_found(format!("pulls/{number}")))
    }

    async fn pull_request_files(&self, number: u64) -> Result<Vec<ChangedFile>> {
        self.record(format!("pull_request_files {number}"));
        let state = self.state.lock().unwrap();
        state
            .pulls
            .get(&number)
            .map(|(_, files)| files.clone())
            .ok_or_else(|| not_found(format!("pulls/{number}/files")))
    }

    async fn download_archive(&self, branch: &str) -> Result<Vec<u8>> {
        self.record(format!("download_archive {branch}"));
        let state = self.state.lock().unwrap();
        state
            .archives
            .get(branch)
            .cloned()
            .ok_or_else(|| not_found(format!("zipball/{branch}")))
    }

    async fn download_raw(&self, url: &str) -> Result<Vec<u8>> {
        self.record(format!("download_raw {url}"));
        let state = self.state.lock().unwrap();
        state
            .raw
            .get(url)
            .cloned()
            .ok_or_else(|| not_found(url.to_string()))
    }

    fn authenticated(&self, token: &str) -> Arc<dyn SourceHost> {
        Arc::new(FakeSourceHost {
            state: self.state.clone(),
            token: Some(token.to_string()),
        })
    }
}

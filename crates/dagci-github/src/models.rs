//! Wire models for the subset of the GitHub REST API the jobs consume.

use serde::{Deserialize, Serialize};

/// `GET /repos/{owner}/{repo}/commits/{branch}` (only the field we read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

/// Branch pointer on either side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub name: String,
    #[serde(default)]
    pub sha: Option<String>,
}

/// `GET /repos/{owner}/{repo}/pulls/{n}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub base: BranchRef,
    pub head: BranchRef,
}

/// Change status of a file in a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
    Changed,
    Unchanged,
    #[serde(other)]
    Unknown,
}

impl FileStatus {
    /// Whether the PR carries content for this path.
    pub fn has_content(&self) -> bool {
        !matches!(self, FileStatus::Removed)
    }
}

/// One entry of `GET /repos/{owner}/{repo}/pulls/{n}/files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: FileStatus,
    #[serde(default)]
    pub raw_url: Option<String>,
}

impl ChangedFile {
    pub fn new(filename: &str, status: FileStatus, raw_url: Option<&str>) -> Self {
        ChangedFile {
            filename: filename.to_string(),
            status,
            raw_url: raw_url.map(str::to_string),
        }
    }
}

//! Workspace assembly: base-branch snapshot plus PR overlay.
//!
//! The resulting tree equals the base branch with every changed file that
//! carries content replaced by its PR version. Files the PR removes are left
//! in place, so checks that load the whole folder still see them.

use dagci_github::{ChangedFile, SourceHost};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::error::FetchError;

/// What [`Fetcher::overlay`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySummary {
    /// Paths written from the PR, in input order.
    pub written: Vec<String>,
    /// Removed paths left untouched.
    pub kept_removed: Vec<String>,
}

/// Downloads trees and files from the source host into a workspace.
pub struct Fetcher<'a> {
    host: &'a dyn SourceHost,
}

impl<'a> Fetcher<'a> {
    pub fn new(host: &'a dyn SourceHost) -> Self {
        Self { host }
    }

    /// Download the archive of `branch` and unpack it into `dest`.
    pub async fn fetch_base(&self, branch: &str, dest: &Path) -> Result<usize, FetchError> {
        info!(branch, "Downloading base branch");
        let bytes = self
            .host
            .download_archive(branch)
            .await
            .map_err(|source| FetchError::Archive {
                branch: branch.to_string(),
                source,
            })?;

        let dest = dest.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || unpack_archive(&bytes, &dest))
            .await
            .map_err(|e| FetchError::Io(io::Error::other(e)))??;
        info!(branch, files = copied, "Base branch unpacked");
        Ok(copied)
    }

    /// Write every changed file that carries content into `dest`.
    ///
    /// The first failed download aborts the overlay.
    pub async fn overlay(
        &self,
        files: &[ChangedFile],
        dest: &Path,
    ) -> Result<OverlaySummary, FetchError> {
        let mut summary = OverlaySummary::default();

        for file in files {
            let relative = checked_relative(&file.filename)?;
            if !file.status.has_content() {
                debug!(path = %file.filename, "Keeping removed file from base");
                summary.kept_removed.push(file.filename.clone());
                continue;
            }

            let url = file
                .raw_url
                .as_deref()
                .ok_or_else(|| FetchError::MissingRawUrl {
                    path: file.filename.clone(),
                })?;
            let content =
                self.host
                    .download_raw(url)
                    .await
                    .map_err(|source| FetchError::File {
                        path: file.filename.clone(),
                        source,
                    })?;

            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &content).await?;
            debug!(path = %file.filename, bytes = content.len(), "Overlaid file");
            summary.written.push(file.filename.clone());
        }

        info!(
            written = summary.written.len(),
            kept_removed = summary.kept_removed.len(),
            "Applied PR overlay"
        );
        Ok(summary)
    }
}

/// Unpack a zip whose entries all live under one root directory (the layout
/// of repository archives) and copy that directory's contents over `dest`.
///
/// Returns the number of files copied.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<usize, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchError::InvalidArchive(e.to_string()))?;

    let staging = tempfile::tempdir()?;
    archive
        .extract(staging.path())
        .map_err(|e| FetchError::InvalidArchive(e.to_string()))?;

    let entries = fs::read_dir(staging.path())?.collect::<io::Result<Vec<_>>>()?;
    let root = match entries.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        _ => {
            return Err(FetchError::EmptyArchive {
                entries: entries.len(),
            })
        }
    };

    fs::create_dir_all(dest)?;
    Ok(copy_tree(&root, dest)?)
}

/// Write the engine's ignore file at the workspace root.
pub fn write_ignore_file(workspace: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
    let path = workspace.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

/// Interpret a repository path as a workspace-relative path, rejecting
/// anything that could resolve outside the workspace.
pub fn checked_relative(path: &str) -> Result<PathBuf, FetchError> {
    let candidate = Path::new(path);
    let safe = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(candidate.to_path_buf())
    } else {
        Err(FetchError::UnsafePath {
            path: path.to_string(),
        })
    }
}

/// Recursive copy that merges into existing directories and overwrites files.
/// Symlinks are recreated as links, so relative links inside the tree keep
/// resolving and link cycles are never walked.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            copy_link(&entry.path(), &target)?;
            copied += 1;
        } else if file_type.is_dir() {
            copied += copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dst)?,
        Ok(_) => fs::remove_file(dst)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::metadata(src)?.is_dir() {
        copy_tree(src, dst).map(|_| ())
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

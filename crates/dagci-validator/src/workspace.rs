//! Per-PR scratch workspaces.
//!
//! A workspace is recreated from nothing at the start of every run and left
//! on disk afterwards for inspection. Runs for the same PR are serialized by
//! an advisory lock file next to the workspace directory.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Locks older than this are assumed to belong to a crashed run.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Scratch directory of one PR.
#[derive(Debug, Clone)]
pub struct ScratchWorkspace {
    root: PathBuf,
}

impl ScratchWorkspace {
    /// Delete any previous workspace for `pr_number` under `scratch_root` and
    /// create an empty one.
    pub fn reset(scratch_root: &Path, pr_number: u64) -> io::Result<Self> {
        let root = scratch_root.join(format!("airflow_pr_{pr_number}"));
        if root.exists() {
            debug!(path = %root.display(), "Removing previous workspace");
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Advisory lock held for the duration of one run.
///
/// The lock file is removed when the guard drops.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    pub fn lock_path(scratch_root: &Path, pr_number: u64) -> PathBuf {
        scratch_root.join(format!("airflow_pr_{pr_number}.lock"))
    }

    /// Try to take the lock. Returns `Ok(None)` when another live run holds it.
    pub fn try_acquire(scratch_root: &Path, pr_number: u64) -> io::Result<Option<Self>> {
        fs::create_dir_all(scratch_root)?;
        let path = Self::lock_path(scratch_root, pr_number);

        match Self::create(&path) {
            Ok(lock) => Ok(Some(lock)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&path) {
                    return Ok(None);
                }
                warn!(path = %path.display(), "Reclaiming stale workspace lock");
                fs::remove_file(&path)?;
                match Self::create(&path) {
                    Ok(lock) => Ok(Some(lock)),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release workspace lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

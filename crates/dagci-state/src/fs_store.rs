//! File-backed key-value store.
//!
//! The whole map lives in one JSON object file. Every mutation rewrites the
//! file through a temp file in the same directory followed by a rename, so a
//! reader never observes a half-written document.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

type Entries = BTreeMap<String, String>;

/// JSON-file key-value store.
///
/// Read-modify-write cycles are serialized by an in-process async lock and
/// the file I/O runs on the blocking pool. Separate processes sharing one
/// file are not coordinated.
pub struct FsKvStore {
    path: Arc<Path>,
    guard: Mutex<()>,
}

impl FsKvStore {
    /// Open (or lazily create) a store at `path`. Parent directories are
    /// created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::from(path.as_ref()),
            guard: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the backing file on the blocking pool while holding
    /// the store lock.
    async fn with_file<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> StorageResult<T> + Send + 'static,
    {
        let _guard = self.guard.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }
}

fn load(path: &Path) -> StorageResult<Entries> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(e) => return Err(StorageError::Io(e)),
    };
    if raw.trim().is_empty() {
        return Ok(Entries::new());
    }
    serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn store(path: &Path, entries: &Entries) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let body = serde_json::to_vec_pretty(entries)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&body)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;

    debug!(path = %path.display(), keys = entries.len(), "state file written");
    Ok(())
}

#[async_trait]
impl KvStore for FsKvStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_file(move |path| Ok(load(path)?.remove(&key)))
            .await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let (key, value) = (key.to_string(), value.to_string());
        self.with_file(move |path| {
            let mut entries = load(path)?;
            entries.insert(key, value);
            store(path, &entries)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let key = key.to_string();
        let expected = expected.map(str::to_string);
        let new = new.to_string();
        self.with_file(move |path| {
            let mut entries = load(path)?;
            check_expected(&key, entries.get(&key), expected.as_deref())?;
            entries.insert(key, new);
            store(path, &entries)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let key = key.to_string();
        self.with_file(move |path| {
            let mut entries = load(path)?;
            if entries.remove(&key).is_some() {
                store(path, &entries)?;
            }
            Ok(())
        })
        .await
    }
}

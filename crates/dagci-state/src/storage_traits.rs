//! Storage trait definitions for dagci
//!
//! `KvStore` is the only persistence seam the jobs need: a flat map of string
//! keys to string values with an atomic compare-and-swap. The commit-polling
//! job keeps its last deployed commit here.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// String key-value store.
///
/// Guarantees:
/// - `get` after a successful `set` or `compare_and_swap` returns the new value.
/// - `compare_and_swap(key, expected, new)` writes `new` only if the current
///   value equals `expected` (`None` meaning absent) and fails with
///   `StorageError::Conflict` otherwise, leaving the stored value untouched.
/// - Read and write of one `compare_and_swap` are atomic with respect to
///   every other operation on the same store instance.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value for `key`, if any.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Unconditionally write `value` under `key`.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Write `new` under `key` if and only if the current value is `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StorageResult<()>;

    /// Remove `key`. No-op if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Reject keys the backends cannot address.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Shared CAS precondition check used by every backend.
pub(crate) fn check_expected(
    key: &str,
    current: Option<&String>,
    expected: Option<&str>,
) -> StorageResult<()> {
    if current.map(String::as_str) == expected {
        Ok(())
    } else {
        Err(StorageError::Conflict {
            key: key.to_string(),
            expected: expected.map(str::to_string),
            actual: current.cloned(),
        })
    }
}

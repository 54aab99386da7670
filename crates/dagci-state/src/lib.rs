//! dagci-state: key-value persistence for dagci jobs
//!
//! This crate provides the persistence layer shared by the deploy poller and
//! the PR validator.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: atomic updates and no lost writes.
//!
//! ## Key Components
//!
//! - `KvStore`: string key-value trait with compare-and-swap
//! - `FsKvStore`: single JSON file backend with atomic replace
//! - `fakes::MemoryKvStore`: in-memory backend for tests

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsKvStore;
pub use storage_traits::{KvStore, StorageResult};

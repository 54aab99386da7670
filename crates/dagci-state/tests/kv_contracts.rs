//! Trait contract tests for KvStore.
//!
//! These tests verify the behavioral contract of the key-value store against
//! both the in-memory fake and the file-backed store. Any conforming
//! implementation must pass these.

use std::sync::Arc;

use dagci_state::fakes::MemoryKvStore;
use dagci_state::{FsKvStore, KvStore, StorageError};

fn stores() -> (tempfile::TempDir, Vec<Arc<dyn KvStore>>) {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = FsKvStore::new(dir.path().join("vars.json"));
    let stores: Vec<Arc<dyn KvStore>> = vec![Arc::new(MemoryKvStore::new()), Arc::new(fs_store)];
    (dir, stores)
}

#[tokio::test]
async fn get_missing_is_none() {
    let (_dir, stores) = stores();
    for store in stores {
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}

#[tokio::test]
async fn set_then_get_round_trip() {
    let (_dir, stores) = stores();
    for store in stores {
        store.set("commit", "abc").await.unwrap();
        assert_eq!(store.get("commit").await.unwrap(), Some("abc".to_string()));

        store.set("commit", "def").await.unwrap();
        assert_eq!(store.get("commit").await.unwrap(), Some("def".to_string()));
    }
}

#[tokio::test]
async fn cas_on_absent_key_expects_none() {
    let (_dir, stores) = stores();
    for store in stores {
        store.compare_and_swap("commit", None, "first").await.unwrap();
        assert_eq!(store.get("commit").await.unwrap(), Some("first".to_string()));

        let err = store
            .compare_and_swap("commit", None, "second")
            .await
            .unwrap_err();
        match err {
            StorageError::Conflict { actual, .. } => assert_eq!(actual, Some("first".to_string())),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn cas_with_matching_value_swaps() {
    let (_dir, stores) = stores();
    for store in stores {
        store.set("commit", "old").await.unwrap();
        store
            .compare_and_swap("commit", Some("old"), "new")
            .await
            .unwrap();
        assert_eq!(store.get("commit").await.unwrap(), Some("new".to_string()));
    }
}

#[tokio::test]
async fn cas_with_stale_value_is_rejected() {
    let (_dir, stores) = stores();
    for store in stores {
        store.set("commit", "current").await.unwrap();
        let err = store
            .compare_and_swap("commit", Some("stale"), "new")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(
            store.get("commit").await.unwrap(),
            Some("current".to_string())
        );
    }
}

#[tokio::test]
async fn only_one_of_two_racing_swaps_wins() {
    let (_dir, stores) = stores();
    for store in stores {
        store.set("commit", "base").await.unwrap();

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.compare_and_swap("commit", Some("base"), "a").await })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.compare_and_swap("commit", Some("base"), "b").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one swap must win");

        let value = store.get("commit").await.unwrap().unwrap();
        assert!(value == "a" || value == "b");
    }
}

#[tokio::test]
async fn delete_removes_key() {
    let (_dir, stores) = stores();
    for store in stores {
        store.set("commit", "abc").await.unwrap();
        store.delete("commit").await.unwrap();
        assert_eq!(store.get("commit").await.unwrap(), None);
        store.delete("commit").await.unwrap();
    }
}

#[tokio::test]
async fn empty_key_is_invalid() {
    let (_dir, stores) = stores();
    for store in stores {
        let err = store.set("  ", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}

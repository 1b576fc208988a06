//! In-memory key-value storage for the replicated state machine.
//!
//! Committed log entries are applied here. Nothing else mutates the store,
//! so every replica that applied the same prefix of the log holds the same map.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe key-value store owned by each node.
///
/// Reads take a shared lock so concurrent `GET`s never wait on each other;
/// only applying a committed entry takes the exclusive lock. The lock is
/// independent of the consensus lock on [`crate::node::ConsensusNode`].
///
/// `BTreeMap` keeps iteration order stable, which makes snapshots
/// deterministic across replicas.
#[derive(Debug, Default)]
pub struct KvStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl KvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, or `None` when absent.
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Stores a key-value pair, overwriting any existing value.
    pub fn set(&self, key: String, value: String) {
        self.write().insert(key, value);
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Returns an independent copy of every key-value pair.
    ///
    /// The lock is released before the caller sees the map, so holding on to
    /// a snapshot never stalls writers.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Every mutation is a single insert or remove, so a panicking holder
    // cannot leave the map half-updated and poisoning is safe to ignore.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_get_reads_back() {
        let store = KvStore::new();
        assert_eq!(store.get("x"), None);

        store.set("x".into(), "1".into());
        store.set("x".into(), "2".into());

        assert_eq!(store.get("x").as_deref(), Some("2"));
        assert!(store.exists("x"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_reports_presence() {
        let store = KvStore::new();
        store.set("x".into(), "1".into());

        assert!(store.delete("x"));
        assert!(!store.delete("x"));
        assert!(!store.exists("x"));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_live_store() {
        let store = KvStore::new();
        store.set("a".into(), "1".into());

        let mut snapshot = store.snapshot();
        snapshot.insert("b".into(), "2".into());
        store.set("a".into(), "changed".into());

        assert_eq!(snapshot.get("a").map(String::as_str), Some("1"));
        assert!(!store.exists("b"));
    }
}

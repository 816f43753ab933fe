//! In-memory key-value store.

use crate::backend::KvStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An in-memory ordered key-value store.
///
/// This store keeps all pairs in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Hosts that persist process memory on their own (e.g. VM snapshots)
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use kvorm_storage::{KvStore, InMemoryStore};
///
/// let mut store = InMemoryStore::new();
/// store.insert("a", "1").unwrap();
/// store.insert("b", "2").unwrap();
/// assert_eq!(store.len().unwrap(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store with pre-existing pairs.
    ///
    /// Useful for testing restart scenarios.
    #[must_use]
    pub fn with_data(data: BTreeMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all pairs in the store.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }

    /// Clears all pairs from the store.
    pub fn clear(&mut self) {
        self.data.write().clear();
    }
}

impl KvStore for InMemoryStore {
    fn insert(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> StorageResult<()> {
        match self.data.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::key_not_found(key)),
        }
    }

    fn items(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let data = self.data.read();
        let range = data.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
        Ok(range
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.data.read().len())
    }
}

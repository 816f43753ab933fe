//! Key-value store trait definition.

use crate::error::StorageResult;

/// An ordered, string-keyed store used by kvorm.
///
/// Stores are **opaque string maps**. kvorm writes JSON documents under
/// structured keys (`Type@id`, `_system@Type_id`, ...) and never asks the
/// store to understand them.
///
/// # Invariants
///
/// - `get` returns exactly the value most recently passed to `insert`
/// - `remove` of a missing key is an error, so callers notice lost records
/// - `items` and `scan_prefix` return pairs in ascending key order
/// - Stores must be `Send + Sync` for use behind a shared database
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and in-process hosts
pub trait KvStore: Send + Sync {
    /// Inserts or replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store rejects the write.
    fn insert(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Removes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::KeyNotFound`] if nothing is stored
    /// under `key`.
    fn remove(&mut self, key: &str) -> StorageResult<()>;

    /// Returns every `(key, value)` pair in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn items(&self) -> StorageResult<Vec<(String, String)>>;

    /// Returns true if a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every pair whose key starts with `prefix`, in key order.
    ///
    /// The default implementation filters [`KvStore::items`]. Ordered stores
    /// should override it with a range scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .items()?
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .collect())
    }

    /// Returns every key in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.items()?.into_iter().map(|(key, _)| key).collect())
    }

    /// Returns the number of stored pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.items()?.len())
    }

    /// Returns true if the store holds no pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the host store cannot be read.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: KvStore + ?Sized> KvStore for Box<S> {
    fn insert(&mut self, key: &str, value: &str) -> StorageResult<()> {
        (**self).insert(key, value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn remove(&mut self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn items(&self) -> StorageResult<Vec<(String, String)>> {
        (**self).items()
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        (**self).contains(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        (**self).scan_prefix(prefix)
    }

    fn len(&self) -> StorageResult<usize> {
        (**self).len()
    }
}

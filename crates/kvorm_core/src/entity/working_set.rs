//! Write-back cache for one mutating operation.

use crate::entity::store::RecordStore;
use crate::error::{CoreError, CoreResult};
use crate::types::EntityKey;
use kvorm_codec::Record;
use std::collections::HashMap;

/// Records touched by one operation.
///
/// Relationship writes update several records, sometimes the same record
/// through two paths (self-referential relationships). The working set loads
/// each record once, hands out mutable access, and writes every changed
/// record back in first-touch order on [`WorkingSet::flush_with`].
pub(crate) struct WorkingSet<'s> {
    store: &'s RecordStore,
    records: HashMap<EntityKey, Record>,
    // As loaded; records added with `insert` have no entry.
    loaded: HashMap<EntityKey, Record>,
    dirty: Vec<EntityKey>,
}

impl<'s> WorkingSet<'s> {
    pub(crate) fn new(store: &'s RecordStore) -> Self {
        Self {
            store,
            records: HashMap::new(),
            loaded: HashMap::new(),
            dirty: Vec::new(),
        }
    }

    /// Adds a record the caller has already loaded and changed.
    pub(crate) fn insert(&mut self, key: EntityKey, record: Record) {
        self.mark(&key);
        self.records.insert(key, record);
    }

    /// Returns mutable access to a record, loading it on first use.
    ///
    /// Returns `None` if the record is not stored.
    pub(crate) fn get_mut(&mut self, key: &EntityKey) -> CoreResult<Option<&mut Record>> {
        if !self.records.contains_key(key) {
            match self.store.load(key)? {
                Some(record) => {
                    self.loaded.insert(key.clone(), record.clone());
                    self.records.insert(key.clone(), record);
                }
                None => return Ok(None),
            }
        }
        self.mark(key);
        Ok(self.records.get_mut(key))
    }

    /// Like [`WorkingSet::get_mut`], but a missing record is an error.
    pub(crate) fn require_mut(&mut self, key: &EntityKey) -> CoreResult<&mut Record> {
        self.get_mut(key)?
            .ok_or_else(|| CoreError::not_found(key.to_string()))
    }

    /// Drops a record without writing it back.
    pub(crate) fn forget(&mut self, key: &EntityKey) {
        self.records.remove(key);
        self.loaded.remove(key);
        self.dirty.retain(|k| k != key);
    }

    /// Writes every changed record back and returns how many were written.
    ///
    /// `touch` runs on each changed record that was loaded from the store,
    /// just before it is written. Records
    /// added with [`WorkingSet::insert`] are written as given. Records loaded
    /// and left as they were are neither touched nor written.
    pub(crate) fn flush_with(
        mut self,
        mut touch: impl FnMut(&EntityKey, &mut Record),
    ) -> CoreResult<usize> {
        let dirty = std::mem::take(&mut self.dirty);
        let mut written = 0;
        for key in &dirty {
            let Some(record) = self.records.get_mut(key) else {
                continue;
            };
            match self.loaded.get(key) {
                Some(before) if before == record => continue,
                Some(_) => touch(key, record),
                None => {}
            }
            self.store.save(key, record)?;
            written += 1;
        }
        Ok(written)
    }

    fn mark(&mut self, key: &EntityKey) {
        if !self.dirty.contains(key) {
            self.dirty.push(key.clone());
        }
    }
}

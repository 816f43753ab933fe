//! Record store over the entity key-value store.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityKey, KEY_SEPARATOR};
use kvorm_codec::Record;
use kvorm_storage::KvStore;
use parking_lot::RwLock;
use tracing::debug;

/// Prefix of counter keys.
pub(crate) const SYSTEM_PREFIX: &str = "_system@";

/// Per-type counter persisted under `_system@<Type>_<suffix>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    /// Highest id assigned so far.
    MaxId,
    /// Number of live instances.
    Count,
}

impl Counter {
    const fn suffix(self) -> &'static str {
        match self {
            Counter::MaxId => "id",
            Counter::Count => "count",
        }
    }
}

/// Provides record-level access to the entity store.
///
/// The `RecordStore` owns the key layout: records under `Type@id`, counters
/// under `_system@Type_id` / `_system@Type_count`, and alias entries under
/// `Type_alias@value`. Counter and alias values are JSON strings.
pub struct RecordStore {
    kv: RwLock<Box<dyn KvStore>>,
}

impl RecordStore {
    /// Creates a record store over a key-value store.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        Self {
            kv: RwLock::new(kv),
        }
    }

    /// Loads a record.
    pub fn load(&self, key: &EntityKey) -> CoreResult<Option<Record>> {
        let text = self.kv.read().get(&key.to_string())?;
        debug!(key = %key, found = text.is_some(), "load");
        text.map(|text| Record::decode(&text).map_err(CoreError::from))
            .transpose()
    }

    /// Writes a record, replacing any previous version.
    pub fn save(&self, key: &EntityKey, record: &Record) -> CoreResult<()> {
        let text = record.encode()?;
        self.kv.write().insert(&key.to_string(), &text)?;
        debug!(key = %key, "save");
        Ok(())
    }

    /// Removes a record.
    pub fn remove(&self, key: &EntityKey) -> CoreResult<()> {
        self.kv.write().remove(&key.to_string())?;
        debug!(key = %key, "delete");
        Ok(())
    }

    /// Checks if a record exists.
    pub fn exists(&self, key: &EntityKey) -> CoreResult<bool> {
        Ok(self.kv.read().contains(&key.to_string())?)
    }

    /// Returns the ids of every stored record of exactly `type_name`.
    pub fn ids(&self, type_name: &str) -> CoreResult<Vec<String>> {
        let prefix = format!("{type_name}{KEY_SEPARATOR}");
        Ok(self
            .kv
            .read()
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    /// Returns every stored record of exactly `type_name`.
    pub fn scan_type(&self, type_name: &str) -> CoreResult<Vec<(String, Record)>> {
        let prefix = format!("{type_name}{KEY_SEPARATOR}");
        let pairs = self.kv.read().scan_prefix(&prefix)?;
        pairs
            .into_iter()
            .map(|(key, text)| Ok((key[prefix.len()..].to_string(), Record::decode(&text)?)))
            .collect()
    }

    /// Reads a counter. Missing counters read as `None`.
    pub(crate) fn counter(&self, type_name: &str, counter: Counter) -> CoreResult<Option<u64>> {
        let key = counter_key(type_name, counter);
        let Some(text) = self.kv.read().get(&key)? else {
            return Ok(None);
        };
        let value: String = kvorm_codec::from_json(&text)?;
        value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CoreError::consistency(format!("counter {key} holds {value:?}")))
    }

    /// Writes a counter.
    pub(crate) fn set_counter(&self, type_name: &str, counter: Counter, value: u64) -> CoreResult<()> {
        let text = kvorm_codec::to_json(&value.to_string())?;
        self.kv
            .write()
            .insert(&counter_key(type_name, counter), &text)?;
        Ok(())
    }

    /// Returns true if the counter has been written.
    pub(crate) fn has_counter(&self, type_name: &str, counter: Counter) -> CoreResult<bool> {
        Ok(self.kv.read().contains(&counter_key(type_name, counter))?)
    }

    /// Returns the entity id an alias value points to.
    pub fn alias_get(&self, type_name: &str, alias: &str) -> CoreResult<Option<String>> {
        self.kv
            .read()
            .get(&alias_key(type_name, alias))?
            .map(|text| kvorm_codec::from_json::<String>(&text).map_err(CoreError::from))
            .transpose()
    }

    /// Points an alias value at an entity id.
    pub fn alias_set(&self, type_name: &str, alias: &str, id: &str) -> CoreResult<()> {
        let text = kvorm_codec::to_json(id)?;
        self.kv.write().insert(&alias_key(type_name, alias), &text)?;
        Ok(())
    }

    /// Removes an alias entry if it still points at `id`.
    pub fn alias_remove(&self, type_name: &str, alias: &str, id: &str) -> CoreResult<bool> {
        if self.alias_get(type_name, alias)?.as_deref() != Some(id) {
            return Ok(false);
        }
        self.kv.write().remove(&alias_key(type_name, alias))?;
        Ok(true)
    }

    /// Returns every raw `(key, value)` pair in key order.
    pub fn items(&self) -> CoreResult<Vec<(String, String)>> {
        Ok(self.kv.read().items()?)
    }

    /// Removes every key.
    pub fn clear(&self) -> CoreResult<()> {
        let mut kv = self.kv.write();
        for key in kv.keys()? {
            kv.remove(&key)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("keys", &self.kv.read().len().unwrap_or(0))
            .finish()
    }
}

fn counter_key(type_name: &str, counter: Counter) -> String {
    format!("{SYSTEM_PREFIX}{type_name}_{}", counter.suffix())
}

fn alias_key(type_name: &str, alias: &str) -> String {
    format!("{type_name}_alias{KEY_SEPARATOR}{alias}")
}

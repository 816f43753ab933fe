//! Append-only audit log.
//!
//! Every accepted create, modify and delete appends one record to a separate
//! key-value store:
//!
//! | Key        | Value                                    |
//! |------------|------------------------------------------|
//! | `_min_id`  | lowest retained sequence id              |
//! | `_max_id`  | next sequence id to assign               |
//! | `<seq>`    | `[operation, timestamp_ms, key, payload]`|
//!
//! Sequence ids are global across all types and start at zero. Records are
//! also pushed to subscribers as they are appended.

use crate::error::{CoreError, CoreResult};
use crate::hooks::Action;
use crate::types::AuditId;
use kvorm_storage::KvStore;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

const MIN_ID_KEY: &str = "_min_id";
const MAX_ID_KEY: &str = "_max_id";

/// One entry of the audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Sequence id.
    pub id: AuditId,
    /// Kind of mutation.
    pub operation: Action,
    /// Clock reading when the mutation was accepted, in ms.
    pub timestamp: i64,
    /// Storage key of the subject, `Type@id`.
    pub key: String,
    /// Subject record after the mutation (before it, for deletes).
    pub payload: serde_json::Value,
}

impl AuditRecord {
    /// Returns the stored JSON form, `[operation, timestamp, key, payload]`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!([
            self.operation.as_str(),
            self.timestamp,
            self.key,
            self.payload
        ])
    }

    fn decode(id: AuditId, text: &str) -> CoreResult<Self> {
        let (operation, timestamp, key, payload): (String, i64, String, serde_json::Value) =
            kvorm_codec::from_json(text)?;
        let operation = match operation.as_str() {
            "create" => Action::Create,
            "modify" => Action::Modify,
            "delete" => Action::Delete,
            other => {
                return Err(CoreError::consistency(format!(
                    "audit record {id} has unknown operation '{other}'"
                )))
            }
        };
        Ok(Self {
            id,
            operation,
            timestamp,
            key,
            payload,
        })
    }
}

/// Audit log over its own key-value store.
pub struct AuditLog {
    store: RwLock<Box<dyn KvStore>>,
    subscribers: RwLock<Vec<Sender<AuditRecord>>>,
}

impl AuditLog {
    /// Opens an audit log, initializing the id bounds if the store is fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn open(mut store: Box<dyn KvStore>) -> CoreResult<Self> {
        for key in [MIN_ID_KEY, MAX_ID_KEY] {
            if !store.contains(key)? {
                store.insert(key, "0")?;
            }
        }
        Ok(Self {
            store: RwLock::new(store),
            subscribers: RwLock::new(Vec::new()),
        })
    }

    /// Appends a record and returns its sequence id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn append(
        &self,
        operation: Action,
        key: &str,
        payload: serde_json::Value,
        timestamp: i64,
    ) -> CoreResult<AuditId> {
        let record = {
            let mut store = self.store.write();
            let id = read_bound(&**store, MAX_ID_KEY)?;
            let record = AuditRecord {
                id,
                operation,
                timestamp,
                key: key.to_string(),
                payload,
            };
            store.insert(&id.to_string(), &record.to_json().to_string())?;
            store.insert(MAX_ID_KEY, &id.next().to_string())?;
            record
        };
        debug!(audit_id = %record.id, operation = %operation, key, "audit record appended");

        let id = record.id;
        self.subscribers
            .write()
            .retain(|tx| tx.send(record.clone()).is_ok());
        Ok(id)
    }

    /// Returns records with ids in `from..=to`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a malformed
    /// record.
    pub fn range(&self, from: u64, to: u64) -> CoreResult<Vec<AuditRecord>> {
        let store = self.store.read();
        let next = read_bound(&**store, MAX_ID_KEY)?.as_u64();
        let min = read_bound(&**store, MIN_ID_KEY)?.as_u64();
        let from = from.max(min);
        let to = to.min(next.saturating_sub(1));
        if next == 0 || from > to {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for seq in from..=to {
            let id = AuditId::new(seq);
            if let Some(text) = store.get(&id.to_string())? {
                records.push(AuditRecord::decode(id, &text)?);
            }
        }
        Ok(records)
    }

    /// Returns every record, keyed by its decimal sequence id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds a malformed
    /// record.
    pub fn export(&self) -> CoreResult<serde_json::Map<String, serde_json::Value>> {
        Ok(self
            .range(0, u64::MAX)?
            .into_iter()
            .map(|record| (record.id.to_string(), record.to_json()))
            .collect())
    }

    /// Returns the id the next record will get.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn next_id(&self) -> CoreResult<AuditId> {
        read_bound(&**self.store.read(), MAX_ID_KEY)
    }

    /// Returns the number of records appended since the log was last cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn len(&self) -> CoreResult<u64> {
        let store = self.store.read();
        let next = read_bound(&**store, MAX_ID_KEY)?.as_u64();
        let min = read_bound(&**store, MIN_ID_KEY)?.as_u64();
        Ok(next.saturating_sub(min))
    }

    /// Returns true if no records are retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every record and resets the id bounds to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> CoreResult<()> {
        let mut store = self.store.write();
        for key in store.keys()? {
            store.remove(&key)?;
        }
        store.insert(MIN_ID_KEY, "0")?;
        store.insert(MAX_ID_KEY, "0")?;
        Ok(())
    }

    /// Subscribes to records appended from now on.
    pub fn subscribe(&self) -> Receiver<AuditRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

fn read_bound(store: &dyn KvStore, key: &str) -> CoreResult<AuditId> {
    let text = store.get(key)?.unwrap_or_else(|| "0".to_string());
    text.trim()
        .parse::<u64>()
        .map(AuditId::new)
        .map_err(|_| CoreError::consistency(format!("audit bound {key} is not a number: {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvorm_storage::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn log() -> AuditLog {
        AuditLog::open(Box::new(InMemoryStore::new())).unwrap()
    }

    #[test]
    fn append_assigns_sequential_ids_from_zero() {
        let log = log();
        let a = log.append(Action::Create, "Person@1", json!({"_id": "1"}), 10).unwrap();
        let b = log.append(Action::Modify, "Person@1", json!({"_id": "1"}), 11).unwrap();
        assert_eq!(a.as_u64(), 0);
        assert_eq!(b.as_u64(), 1);
        assert_eq!(log.next_id().unwrap().as_u64(), 2);
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn range_is_inclusive() {
        let log = log();
        for i in 0..5 {
            log.append(Action::Create, &format!("T@{i}"), json!(null), i).unwrap();
        }
        let records = log.range(1, 3).unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(records[0].key, "T@1");

        assert!(log.range(3, 1).unwrap().is_empty());
        assert_eq!(log.range(4, 100).unwrap().len(), 1);
    }

    #[test]
    fn stored_form_is_a_json_array() {
        let log = log();
        log.append(Action::Delete, "Person@2", json!({"name": "x"}), 42).unwrap();
        let exported = log.export().unwrap();
        assert_eq!(
            exported.get("0"),
            Some(&json!(["delete", 42, "Person@2", {"name": "x"}]))
        );
    }

    #[test]
    fn clear_resets_ids() {
        let log = log();
        log.append(Action::Create, "T@1", json!(null), 0).unwrap();
        log.clear().unwrap();
        assert!(log.is_empty().unwrap());
        let id = log.append(Action::Create, "T@1", json!(null), 0).unwrap();
        assert_eq!(id.as_u64(), 0);
    }

    #[test]
    fn reopen_continues_sequence() {
        let mut store = InMemoryStore::new();
        store.insert(MIN_ID_KEY, "0").unwrap();
        store.insert(MAX_ID_KEY, "7").unwrap();
        let log = AuditLog::open(Box::new(store)).unwrap();
        let id = log.append(Action::Create, "T@1", json!(null), 0).unwrap();
        assert_eq!(id.as_u64(), 7);
    }

    #[test]
    fn subscribers_receive_appended_records() {
        let log = log();
        let rx = log.subscribe();
        log.append(Action::Create, "T@1", json!(null), 5).unwrap();
        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received.key, "T@1");
        assert_eq!(received.operation, Action::Create);

        drop(rx);
        log.append(Action::Create, "T@2", json!(null), 6).unwrap();
        assert_eq!(log.subscriber_count(), 0);
    }
}

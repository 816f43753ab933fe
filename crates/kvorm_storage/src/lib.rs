//! # kvorm Storage
//!
//! Key-value store contract and implementations for kvorm.
//!
//! This crate provides the lowest-level storage abstraction for kvorm.
//! Stores are **opaque string maps** - they do not interpret the keys or
//! the JSON documents they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple ordered maps (insert, get, remove, items)
//! - No knowledge of entity records, aliases, counters or audit entries
//! - Must be `Send + Sync` so a database can be shared across threads
//! - kvorm owns all key layout and value interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and hosts that snapshot memory themselves
//!
//! ## Example
//!
//! ```rust
//! use kvorm_storage::{KvStore, InMemoryStore};
//!
//! let mut store = InMemoryStore::new();
//! store.insert("Person@1", "{\"name\":\"John\"}").unwrap();
//! assert_eq!(store.get("Person@1").unwrap().as_deref(), Some("{\"name\":\"John\"}"));
//! assert!(store.contains("Person@1").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::KvStore;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;

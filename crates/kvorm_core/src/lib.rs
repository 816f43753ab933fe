//! # kvorm Core
//!
//! Entity-relational engine over an ordered key-value store.
//!
//! This crate provides:
//! - Typed property declarations with validation and coercion
//! - One-to-one, one-to-many, many-to-one and many-to-many relationships
//!   whose inverse sides are kept consistent on every write
//! - Namespaced type registry with per-type id sequences
//! - Alias lookups, pagination and subtype-aware enumeration
//! - Per-type mutation hooks for validation and access control
//! - An append-only audit log of every accepted mutation
//!
//! Everything is persisted as JSON text in a host-provided
//! [`kvorm_storage::KvStore`]; there is no save step and no transaction.
//!
//! ## Example
//!
//! ```
//! use kvorm_core::{Database, EntitySchema, PropertyDef, RelationDef};
//!
//! let db = Database::open_in_memory()?;
//! let people = db.register_type(
//!     EntitySchema::builder("Person")
//!         .property(PropertyDef::string("name"))
//!         .relation(RelationDef::many_to_one("mother", "Person", "children"))
//!         .relation(RelationDef::one_to_many("children", "Person", "mother"))
//!         .alias("name")
//!         .build(),
//! )?;
//!
//! let john = people.create([("name", "John".into())])?;
//! let alice = people.create([("name", "alice".into())])?;
//! john.set_ref("mother", Some(&alice))?;
//!
//! assert_eq!(alice.get_refs("children")?, vec![john.clone()]);
//! assert_eq!(people.count()?, 2);
//! # Ok::<(), kvorm_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod clock;
mod config;
mod context;
mod database;
mod entity;
mod error;
mod hooks;
mod property;
mod registry;
mod relation;
mod schema;
mod types;

pub use audit::{AuditLog, AuditRecord};
pub use clock::TimeProvider;
pub use config::Config;
pub use context::CallerGuard;
pub use database::{Database, Export};
pub use entity::{Entity, EntityType, RecordStore};
pub use error::{CoreError, CoreResult};
pub use hooks::{Action, EntityHook, HookDecision, HookEvent};
pub use property::{PropertyDef, PropertyKind};
pub use registry::TypeRegistry;
pub use relation::{RelationDef, RelationKind};
pub use schema::{EntitySchema, SchemaBuilder};
pub use types::{compare_ids, qualify, split_qualified, AuditId, EntityKey};

pub use kvorm_codec::{Record, Value};

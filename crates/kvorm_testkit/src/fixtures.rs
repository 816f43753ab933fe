//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use kvorm_core::{Config, Database};
use kvorm_storage::{KvStore, StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Clock reading every test database starts at, in ms.
pub const FIXED_TIME: i64 = 1_700_000_000_000;

/// A key-value store whose clones share one map.
///
/// Hand one clone to a [`Database`] and keep another to inspect or tamper
/// with the raw pairs, or to open a second database over the same data.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl SharedStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all pairs.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }

    /// Keeps only the pairs for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.data.write().retain(|k, v| keep(k, v));
    }

    /// Overwrites one raw pair.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.data.write().insert(key.to_string(), value.to_string());
    }
}

impl KvStore for SharedStore {
    fn insert(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.put_raw(key, value);
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
}

/// A test database over shared stores, with a pinned clock.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    store: SharedStore,
    audit_store: SharedStore,
}

impl TestDatabase {
    /// Creates a fresh test database with the clock pinned at [`FIXED_TIME`].
    pub fn memory() -> Self {
        Self::with_config(Config::new().fixed_time(FIXED_TIME))
    }

    /// Creates a fresh test database with custom configuration.
    pub fn with_config(config: Config) -> Self {
        Self::over(config, SharedStore::new(), SharedStore::new())
    }

    fn over(config: Config, store: SharedStore, audit_store: SharedStore) -> Self {
        let db = Database::open_with_stores(
            config,
            Box::new(store.clone()),
            Box::new(audit_store.clone()),
        )
        .expect("Failed to open test database");
        Self {
            db,
            store,
            audit_store,
        }
    }

    /// Opens a second database over the same stores, as after a restart.
    ///
    /// Types are not carried over; register them again.
    pub fn reopen(&self) -> Self {
        Self::over(
            self.db.config().clone(),
            self.store.clone(),
            self.audit_store.clone(),
        )
    }

    /// Returns the entity store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Returns the audit store.
    pub fn audit_store(&self) -> &SharedStore {
        &self.audit_store
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary database.
///
/// # Example
///
/// ```rust,ignore
/// use kvorm_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let people = db.register_type(person_schema()).unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Installs a test-friendly tracing subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test scenario helpers.
pub mod scenarios {
    use kvorm_core::{
        CoreResult, Database, EntitySchema, EntityType, HookDecision, PropertyDef, RelationDef,
    };

    /// `Person` with a `name` alias, a non-negative `age`, and a
    /// `mother`/`children` relationship to itself.
    pub fn person_schema() -> EntitySchema {
        EntitySchema::builder("Person")
            .property(PropertyDef::string("name").min_length(1))
            .property(PropertyDef::integer("age").min(0))
            .relation(RelationDef::many_to_one("mother", "Person", "children"))
            .relation(RelationDef::one_to_many("children", "Person", "mother"))
            .alias("name")
            .build()
    }

    /// Registers [`person_schema`].
    pub fn register_family(db: &Database) -> CoreResult<EntityType<'_>> {
        db.register_type(person_schema())
    }

    /// Registers `Student` and `Course`, linked many-to-many through
    /// `courses`/`students`.
    pub fn register_school(db: &Database) -> CoreResult<(EntityType<'_>, EntityType<'_>)> {
        let students = db.register_type(
            EntitySchema::builder("Student")
                .property(PropertyDef::string("name"))
                .relation(RelationDef::many_to_many("courses", "Course", "students"))
                .alias("name")
                .build(),
        )?;
        let courses = db.register_type(
            EntitySchema::builder("Course")
                .property(PropertyDef::string("title"))
                .relation(RelationDef::many_to_many("students", "Student", "courses"))
                .build(),
        )?;
        Ok((students, courses))
    }

    /// `Partner` with a `name` and a one-to-one `spouse` relationship to
    /// itself.
    pub fn couple_schema() -> EntitySchema {
        EntitySchema::builder("Partner")
            .property(PropertyDef::string("name"))
            .relation(RelationDef::one_to_one("spouse", "Partner", "spouse"))
            .build()
    }

    /// Registers [`couple_schema`].
    pub fn register_couples(db: &Database) -> CoreResult<EntityType<'_>> {
        db.register_type(couple_schema())
    }

    /// `User` whose hook rejects any `email` without an `@`.
    pub fn user_schema() -> EntitySchema {
        EntitySchema::builder("User")
            .property(PropertyDef::string("email"))
            .timestamped()
            .on_event(|event| {
                if !event.is_field("email") {
                    return event.allow();
                }
                let valid = event
                    .new_value
                    .as_str()
                    .map_or(true, |email| email.contains('@'));
                HookDecision::from_bool(valid, event.new_value.clone())
            })
            .build()
    }

    /// Registers [`person_schema`] and creates `count` people named
    /// `person_0`, `person_1`, ...
    pub fn populated_people(db: &Database, count: usize) -> CoreResult<EntityType<'_>> {
        let people = register_family(db)?;
        for i in 0..count {
            people.create([("name", format!("person_{i}").into())])?;
        }
        Ok(people)
    }
}

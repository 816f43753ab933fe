//! Database facade.

use crate::audit::{AuditLog, AuditRecord};
use crate::clock::TimeProvider;
use crate::config::Config;
use crate::context::{self, CallerGuard};
use crate::entity::{Counter, EntityType, RecordStore, WorkingSet};
use crate::error::{CoreError, CoreResult};
use crate::hooks::Action;
use crate::registry::TypeRegistry;
use crate::schema::EntitySchema;
use crate::types::EntityKey;
use kvorm_codec::{Record, Value, ID_FIELD, UPDATED_FIELD, UPDATER_FIELD};
use kvorm_storage::{InMemoryStore, KvStore};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

/// Live records grouped by qualified type name, then by id.
pub type Export = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

/// The main database handle.
///
/// `Database` owns the entity store, the audit store, the type registry and
/// the clock. It provides:
/// - Type registration and resolution
/// - Caller identity for the current thread
/// - Audit queries
/// - JSON export, import and raw dumps
///
/// Entities are created and loaded through the [`EntityType`] handles that
/// registration returns.
///
/// # Example
///
/// ```
/// use kvorm_core::{Database, EntitySchema, PropertyDef};
///
/// let db = Database::open_in_memory()?;
/// let people = db.register_type(
///     EntitySchema::builder("Person")
///         .property(PropertyDef::string("name"))
///         .alias("name")
///         .build(),
/// )?;
///
/// let john = people.create([("name", "John".into())])?;
/// assert_eq!(john.id(), "1");
/// assert_eq!(people.by_alias("John")?, john);
/// # Ok::<(), kvorm_core::CoreError>(())
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Entity records, counters and alias entries.
    records: RecordStore,
    /// Audit log.
    audit: AuditLog,
    /// Registered types.
    registry: RwLock<TypeRegistry>,
    /// Clock for audit and timestamp fields.
    clock: TimeProvider,
}

impl Database {
    /// Opens a fresh in-memory database with default configuration.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_config(Config::default())
    }

    /// Opens a fresh in-memory database with custom configuration.
    pub fn open_with_config(config: Config) -> CoreResult<Self> {
        Self::open_with_stores(
            config,
            Box::new(InMemoryStore::new()),
            Box::new(InMemoryStore::new()),
        )
    }

    /// Opens a database over host-provided stores.
    ///
    /// Existing records are kept. Id counters missing from the store are
    /// rebuilt from the stored records when each type is registered, so
    /// reopening a store continues every sequence where it left off.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit store cannot be initialized.
    pub fn open_with_stores(
        config: Config,
        store: Box<dyn KvStore>,
        audit_store: Box<dyn KvStore>,
    ) -> CoreResult<Self> {
        let clock = match config.fixed_time {
            Some(millis) => TimeProvider::fixed(millis),
            None => TimeProvider::new(),
        };
        let audit = AuditLog::open(audit_store)?;
        info!(audit = config.audit_enabled, "database opened");
        Ok(Self {
            config,
            records: RecordStore::new(store),
            audit,
            registry: RwLock::new(TypeRegistry::new()),
            clock,
        })
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the clock used for audit and timestamp fields.
    pub fn time(&self) -> &TimeProvider {
        &self.clock
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Registers an entity type and returns its handle.
    ///
    /// Registering an already-registered qualified name returns the existing
    /// type. A bare name already used in another namespace is kept by its
    /// first registrant for bare-name lookups.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for malformed declarations and
    /// [`CoreError::Resolution`] if `extends` names an unknown type.
    pub fn register_type(&self, schema: EntitySchema) -> CoreResult<EntityType<'_>> {
        let registration = self.registry.write().register(schema)?;
        if registration.is_new {
            self.reconcile_counters(&registration.schema.qualified_name())?;
        }
        Ok(EntityType::new(self, registration.schema))
    }

    /// Looks a type up by qualified name, or by bare name (first registrant).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Resolution`] if no such type is registered.
    pub fn entity_type(&self, name: &str) -> CoreResult<EntityType<'_>> {
        let schema = self
            .registry
            .read()
            .lookup(name)
            .ok_or_else(|| CoreError::resolution(format!("unknown type '{name}'")))?;
        Ok(EntityType::new(self, schema))
    }

    /// Resolves a type name the way relationship targets are resolved:
    /// exact qualified name, then `hint::name`, then an unambiguous bare name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Resolution`] if the name is unknown or ambiguous.
    pub fn resolve_type(&self, name: &str, hint: Option<&str>) -> CoreResult<EntityType<'_>> {
        let schema = self.registry.read().resolve(name, hint)?;
        Ok(EntityType::new(self, schema))
    }

    /// Returns every registered qualified type name, sorted.
    pub fn type_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    fn reconcile_counters(&self, qualified: &str) -> CoreResult<()> {
        let has_max = self.records.has_counter(qualified, Counter::MaxId)?;
        let has_count = self.records.has_counter(qualified, Counter::Count)?;
        if has_max && has_count {
            return Ok(());
        }
        let ids = self.records.ids(qualified)?;
        if ids.is_empty() {
            return Ok(());
        }
        if !has_max {
            let max = ids
                .iter()
                .filter_map(|id| id.parse::<u64>().ok())
                .max()
                .unwrap_or(0);
            self.records.set_counter(qualified, Counter::MaxId, max)?;
            warn!(type_name = qualified, max_id = max, "rebuilt id counter from storage");
        }
        if !has_count {
            let count = ids.len() as u64;
            self.records.set_counter(qualified, Counter::Count, count)?;
            warn!(type_name = qualified, count, "rebuilt instance count from storage");
        }
        Ok(())
    }

    // ========================================================================
    // Caller identity
    // ========================================================================

    /// Returns the caller id for the current thread.
    ///
    /// Falls back to [`Config::default_caller`] when none is set.
    pub fn get_caller_id(&self) -> String {
        context::current().unwrap_or_else(|| self.config.default_caller.clone())
    }

    /// Sets the caller id for the current thread until changed.
    pub fn set_caller_id(&self, caller: impl Into<String>) {
        context::replace(Some(caller.into()));
    }

    /// Acts as `caller` until the returned guard is dropped.
    ///
    /// ```
    /// # let db = kvorm_core::Database::open_in_memory().unwrap();
    /// {
    ///     let _guard = db.as_user("alice");
    ///     assert_eq!(db.get_caller_id(), "alice");
    /// }
    /// assert_eq!(db.get_caller_id(), "system");
    /// ```
    pub fn as_user(&self, caller: impl Into<String>) -> CallerGuard {
        CallerGuard::enter(caller)
    }

    /// Runs `f` as `caller`, restoring the previous caller afterwards.
    pub fn with_caller<R>(&self, caller: impl Into<String>, f: impl FnOnce() -> R) -> R {
        let _guard = CallerGuard::enter(caller);
        f()
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Returns audit records with ids in `from..=to`, in order.
    pub fn get_audit(&self, from: u64, to: u64) -> CoreResult<Vec<AuditRecord>> {
        self.audit.range(from, to)
    }

    /// Returns the whole audit log, keyed by decimal sequence id.
    pub fn export_audit(&self) -> CoreResult<serde_json::Map<String, serde_json::Value>> {
        self.audit.export()
    }

    /// Returns the number of audit records.
    pub fn audit_len(&self) -> CoreResult<u64> {
        self.audit.len()
    }

    /// Subscribes to audit records appended from now on.
    pub fn subscribe_audit(&self) -> Receiver<AuditRecord> {
        self.audit.subscribe()
    }

    // ========================================================================
    // Export and import
    // ========================================================================

    /// Returns every live entity record, grouped by type then id.
    ///
    /// Counter and alias entries are skipped, as is anything whose `_type`
    /// does not match its key.
    pub fn export(&self) -> CoreResult<Export> {
        let mut export = Export::new();
        for (key, text) in self.records.items()? {
            if key.starts_with('_') {
                continue;
            }
            let Some(entity_key) = EntityKey::parse(&key) else {
                continue;
            };
            let Ok(record) = Record::decode(&text) else {
                continue;
            };
            if record.type_name() != Some(entity_key.type_name.as_str()) {
                continue;
            }
            export
                .entry(entity_key.type_name)
                .or_default()
                .insert(entity_key.id, record.to_json());
        }
        Ok(export)
    }

    /// Serializes [`Database::export`] as JSON text.
    pub fn dump_json(&self, pretty: bool) -> CoreResult<String> {
        let export = self.export()?;
        Ok(if pretty {
            kvorm_codec::to_json_pretty(&export)?
        } else {
            kvorm_codec::to_json(&export)?
        })
    }

    /// Serializes every raw key and value of the entity store as JSON text.
    pub fn raw_dump_json(&self, pretty: bool) -> CoreResult<String> {
        let raw: BTreeMap<String, String> = self.records.items()?.into_iter().collect();
        Ok(if pretty {
            kvorm_codec::to_json_pretty(&raw)?
        } else {
            kvorm_codec::to_json(&raw)?
        })
    }

    /// Imports JSON in the shape [`Database::dump_json`] produces.
    ///
    /// Scalars are upserted first, so that every entity exists before any
    /// relationship field is linked in the second pass. Returns the number of
    /// records imported.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for malformed JSON and
    /// [`CoreError::Resolution`] for unregistered types. Records imported
    /// before an error stay imported.
    pub fn import_json(&self, text: &str) -> CoreResult<usize> {
        let data: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
            kvorm_codec::from_json(text)?;

        let mut linked = Vec::new();
        for (type_name, entities) in &data {
            let entity_type = self.entity_type(type_name)?;
            for (id, json) in entities {
                let mut record = Record::from_json(json)?;
                if record.get(ID_FIELD).is_none() {
                    record.set(ID_FIELD, Value::from(id));
                }
                let entity = entity_type.upsert(&record)?;
                linked.push((entity, record));
            }
        }

        for (entity, record) in &linked {
            for relation in &entity.schema().relations {
                match record.get(&relation.name) {
                    None => {}
                    Some(value) if relation.kind.is_to_many() => {
                        let ids = value.as_id_list().ok_or_else(|| {
                            CoreError::validation(
                                &relation.name,
                                value,
                                "must be a list of entity ids",
                            )
                        })?;
                        entity.set_ref_ids(&relation.name, &ids)?;
                    }
                    Some(Value::Null) => entity.set_ref_id(&relation.name, None)?,
                    Some(Value::String(id)) => {
                        entity.set_ref_id(&relation.name, Some(id.as_str()))?;
                    }
                    Some(value) => {
                        return Err(CoreError::validation(
                            &relation.name,
                            value,
                            "must be an entity id or null",
                        ))
                    }
                }
            }
        }
        info!(records = linked.len(), "imported JSON");
        Ok(linked.len())
    }

    /// Removes every entity, counter, alias entry and audit record.
    ///
    /// Registered types stay registered.
    pub fn clear(&self) -> CoreResult<()> {
        self.records.clear()?;
        self.audit.clear()?;
        info!("database cleared");
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) fn records(&self) -> &RecordStore {
        &self.records
    }

    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.registry.read()
    }

    /// Appends an audit record for an accepted mutation.
    pub(crate) fn record_audit(
        &self,
        action: Action,
        key: &EntityKey,
        record: &Record,
    ) -> CoreResult<()> {
        if !self.config.audit_enabled {
            return Ok(());
        }
        self.audit
            .append(action, &key.to_string(), record.to_json(), self.clock.now())?;
        Ok(())
    }

    /// Writes back a working set. Loaded records that changed and belong to
    /// a timestamped type are stamped as updated by the current caller.
    pub(crate) fn flush_touched(&self, ws: WorkingSet<'_>) -> CoreResult<usize> {
        let registry = self.registry();
        let now = self.clock.now();
        let caller = self.get_caller_id();
        ws.flush_with(|key, record| {
            if registry
                .get(&key.type_name)
                .is_some_and(|schema| schema.timestamped)
            {
                record.set(UPDATED_FIELD, Value::Integer(now));
                record.set(UPDATER_FIELD, Value::String(caller.clone()));
            }
        })
    }

    /// Moves a type's live count by `delta`, never below zero.
    pub(crate) fn adjust_count(&self, qualified: &str, delta: i64) -> CoreResult<()> {
        let current = self.records.counter(qualified, Counter::Count)?.unwrap_or(0);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta.unsigned_abs())
        };
        debug!(type_name = qualified, count = next, "count adjusted");
        self.records.set_counter(qualified, Counter::Count, next)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("types", &self.registry.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookDecision, HookEvent};
    use crate::property::PropertyDef;
    use crate::relation::RelationDef;
    use crate::types::AuditId;

    fn person_schema() -> EntitySchema {
        EntitySchema::builder("Person")
            .property(PropertyDef::string("name"))
            .property(PropertyDef::integer("age").min(0))
            .relation(RelationDef::many_to_one("mother", "Person", "children"))
            .relation(RelationDef::one_to_many("children", "Person", "mother"))
            .alias("name")
            .build()
    }

    fn create_db() -> Database {
        Database::open_with_config(Config::new().fixed_time(1_000)).unwrap()
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();

        let john = people.create([("name", "John".into())]).unwrap();
        let peter = people.create([("name", "Peter".into())]).unwrap();

        assert_eq!(john.id(), "1");
        assert_eq!(peter.id(), "2");
        assert_eq!(people.count().unwrap(), 2);
        assert_eq!(people.max_id().unwrap(), 2);
        assert_eq!(john.get("name").unwrap(), Value::from("John"));
        assert_eq!(john.get("age").unwrap(), Value::Null);
    }

    #[test]
    fn failed_validation_persists_nothing() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();

        let err = people
            .create([("name", "John".into()), ("age", Value::from(-1))])
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(people.count().unwrap(), 0);
        assert_eq!(people.max_id().unwrap(), 0);
        assert_eq!(db.audit_len().unwrap(), 0);

        let john = people.create([("name", "John".into())]).unwrap();
        assert_eq!(john.id(), "1");
        assert!(john.set("age", -5).is_err());
        assert_eq!(john.get("age").unwrap(), Value::Null);
    }

    #[test]
    fn string_input_is_coerced() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let john = people.create([("name", "John".into())]).unwrap();

        john.set("age", "42").unwrap();
        assert_eq!(john.get("age").unwrap(), Value::Integer(42));
    }

    #[test]
    fn alias_lookup_and_uniqueness() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let john = people.create([("name", "John".into())]).unwrap();

        assert_eq!(people.by_alias("John").unwrap(), john);
        assert_eq!(people.get("John").unwrap(), Some(john.clone()));
        assert_eq!(people.get("1").unwrap(), Some(john.clone()));

        let err = people.create([("name", "John".into())]).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEntity { .. }));

        john.set("name", "Johnny").unwrap();
        assert!(people.find_by_alias("John").unwrap().is_none());
        assert_eq!(people.by_alias("Johnny").unwrap(), john);

        people.create([("name", "John".into())]).unwrap();
        assert_eq!(people.count().unwrap(), 2);
    }

    #[test]
    fn many_to_one_keeps_both_sides() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();
        let ann = people.create([("name", "Ann".into())]).unwrap();
        let peter = people.create([("name", "Peter".into())]).unwrap();

        peter.set_ref("mother", Some(&mary)).unwrap();
        assert_eq!(peter.get_ref("mother").unwrap(), Some(mary.clone()));
        assert_eq!(mary.get_refs("children").unwrap(), vec![peter.clone()]);

        peter.set_ref("mother", Some(&ann)).unwrap();
        assert!(mary.get_refs("children").unwrap().is_empty());
        assert_eq!(ann.get_refs("children").unwrap(), vec![peter.clone()]);

        peter.set_ref("mother", None).unwrap();
        assert!(ann.get_refs("children").unwrap().is_empty());
        assert_eq!(peter.get("mother").unwrap(), Value::Null);
    }

    #[test]
    fn one_to_many_moves_child_between_owners() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();
        let ann = people.create([("name", "Ann".into())]).unwrap();
        let peter = people.create([("name", "Peter".into())]).unwrap();

        mary.add_ref("children", &peter).unwrap();
        ann.add_ref("children", &peter).unwrap();

        assert!(mary.get_refs("children").unwrap().is_empty());
        assert_eq!(peter.get_ref("mother").unwrap(), Some(ann));
    }

    #[test]
    fn one_to_one_releases_previous_partner() {
        let db = create_db();
        let people = db
            .register_type(
                EntitySchema::builder("Person")
                    .property(PropertyDef::string("name"))
                    .relation(RelationDef::one_to_one("spouse", "Person", "spouse"))
                    .build(),
            )
            .unwrap();
        let a = people.create([("name", "A".into())]).unwrap();
        let b = people.create([("name", "B".into())]).unwrap();
        let c = people.create([("name", "C".into())]).unwrap();

        a.set_ref("spouse", Some(&b)).unwrap();
        assert_eq!(b.get_ref("spouse").unwrap(), Some(a.clone()));

        c.set_ref("spouse", Some(&b)).unwrap();
        assert_eq!(b.get_ref("spouse").unwrap(), Some(c.clone()));
        assert_eq!(c.get_ref("spouse").unwrap(), Some(b));
        assert_eq!(a.get_ref("spouse").unwrap(), None);
    }

    #[test]
    fn many_to_many_add_is_idempotent() {
        let db = create_db();
        let students = db
            .register_type(
                EntitySchema::builder("Student")
                    .property(PropertyDef::string("name"))
                    .relation(RelationDef::many_to_many("courses", "Course", "students"))
                    .build(),
            )
            .unwrap();
        let courses = db
            .register_type(
                EntitySchema::builder("Course")
                    .property(PropertyDef::string("title"))
                    .relation(RelationDef::many_to_many("students", "Student", "courses"))
                    .build(),
            )
            .unwrap();
        let sam = students.create([("name", "Sam".into())]).unwrap();
        let math = courses.create([("title", "Math".into())]).unwrap();

        sam.add_ref("courses", &math).unwrap();
        let audited = db.audit_len().unwrap();
        sam.add_ref("courses", &math).unwrap();

        assert_eq!(db.audit_len().unwrap(), audited);
        assert_eq!(sam.get_refs("courses").unwrap(), vec![math.clone()]);
        assert_eq!(math.get_refs("students").unwrap(), vec![sam.clone()]);

        math.remove_ref("students", &sam).unwrap();
        assert!(sam.get_refs("courses").unwrap().is_empty());
    }

    #[test]
    fn wrong_relationship_accessor_is_rejected() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();

        assert!(matches!(
            mary.set("children", "2"),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            mary.set_ref("children", None),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            people.create([("nickname", Value::from("M"))]),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            people.create([("mother", Value::Integer(1))]),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn create_links_relationship_fields() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let alice = people.create([("name", "Alice".into())]).unwrap();
        let audited = db.audit_len().unwrap();

        let john = people
            .create([("name", "John".into()), ("mother", Value::from(alice.id()))])
            .unwrap();

        assert_eq!(john.get_ref("mother").unwrap(), Some(alice.clone()));
        assert_eq!(alice.get_refs("children").unwrap(), vec![john.clone()]);
        let audit = db.get_audit(audited, 100).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].operation, Action::Create);
        assert_eq!(audit[0].key, "Person@2");
        assert_eq!(audit[0].payload["mother"], serde_json::json!("1"));

        let ann = people
            .create([
                ("name", "Ann".into()),
                ("children", Value::id_list([john.id(), john.id()])),
            ])
            .unwrap();
        assert_eq!(ann.get("children").unwrap(), Value::id_list([john.id()]));
        assert_eq!(john.get_ref("mother").unwrap(), Some(ann));
        assert!(alice.get_refs("children").unwrap().is_empty());
    }

    #[test]
    fn create_with_missing_partner_consumes_no_id() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();

        let err = people
            .create([("name", "John".into()), ("mother", Value::from("42"))])
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(people.count().unwrap(), 0);
        assert_eq!(people.max_id().unwrap(), 0);
        assert_eq!(db.audit_len().unwrap(), 0);
        assert!(people.find_by_alias("John").unwrap().is_none());
    }

    #[test]
    fn subtypes_declare_their_own_relations() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let staff = db
            .register_type(
                EntitySchema::builder("Employee")
                    .relation(RelationDef::many_to_one("manager", "Employee", "reports"))
                    .relation(RelationDef::one_to_many("reports", "Employee", "manager"))
                    .extends("Person")
                    .build(),
            )
            .unwrap();
        let boss = staff.create([("name", "Boss".into())]).unwrap();
        let eve = staff
            .create([("name", "Eve".into()), ("manager", Value::from(boss.id()))])
            .unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();

        assert_eq!(boss.get_refs("reports").unwrap(), vec![eve.clone()]);
        assert!(matches!(
            eve.get("mother"),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            eve.set_ref("mother", Some(&mary)),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            mary.add_ref("children", &eve),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(mary.get_refs("children").unwrap().is_empty());
    }

    #[test]
    fn missing_inverse_is_a_resolution_error() {
        let db = create_db();
        let people = db
            .register_type(
                EntitySchema::builder("Person")
                    .relation(RelationDef::many_to_one("mother", "Person", "kids"))
                    .build(),
            )
            .unwrap();
        let a = people.create_empty().unwrap();
        let b = people.create_empty().unwrap();

        assert!(matches!(
            a.set_ref("mother", Some(&b)),
            Err(CoreError::Resolution { .. })
        ));
    }

    #[test]
    fn delete_unlinks_partners_and_goes_stale() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();
        let peter = people.create([("name", "Peter".into())]).unwrap();
        peter.set_ref("mother", Some(&mary)).unwrap();

        mary.delete().unwrap();

        assert_eq!(peter.get("mother").unwrap(), Value::Null);
        assert_eq!(people.count().unwrap(), 1);
        assert_eq!(people.max_id().unwrap(), 2);
        assert!(people.find_by_alias("Mary").unwrap().is_none());
        assert!(matches!(mary.to_record(), Err(CoreError::StaleEntity { .. })));
        assert!(matches!(mary.delete(), Err(CoreError::StaleEntity { .. })));

        let next = people.create([("name", "Mary".into())]).unwrap();
        assert_eq!(next.id(), "3");
    }

    #[test]
    fn hook_rejects_and_transforms() {
        let db = create_db();
        let users = db
            .register_type(
                EntitySchema::builder("User")
                    .property(PropertyDef::string("email"))
                    .on_event(|event: &HookEvent<'_>| {
                        if !event.is_field("email") {
                            return event.allow();
                        }
                        match event.new_value.as_str() {
                            Some(email) if email.contains('@') => {
                                HookDecision::Accept(Value::from(email.to_lowercase()))
                            }
                            Some(_) => HookDecision::Reject,
                            None => event.allow(),
                        }
                    })
                    .build(),
            )
            .unwrap();

        let err = users.create([("email", "nope".into())]).unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(users.count().unwrap(), 0);
        assert_eq!(users.max_id().unwrap(), 0);

        let user = users.create([("email", "Bob@Example.com".into())]).unwrap();
        assert_eq!(user.get("email").unwrap(), Value::from("bob@example.com"));

        assert!(user.set("email", "still-nope").unwrap_err().is_permission_denied());
        assert_eq!(user.get("email").unwrap(), Value::from("bob@example.com"));
    }

    #[test]
    fn hook_can_veto_delete() {
        let db = create_db();
        let notes = db
            .register_type(
                EntitySchema::builder("Note")
                    .property(PropertyDef::string("text"))
                    .on_event(|event: &HookEvent<'_>| {
                        HookDecision::from_bool(
                            event.action != Action::Delete,
                            event.new_value.clone(),
                        )
                    })
                    .build(),
            )
            .unwrap();
        let note = notes.create([("text", "keep me".into())]).unwrap();

        assert!(note.delete().unwrap_err().is_permission_denied());
        assert!(note.exists().unwrap());
        assert_eq!(notes.count().unwrap(), 1);
    }

    #[test]
    fn namespaces_keep_types_apart() {
        let db = create_db();
        let hr = db
            .register_type(
                EntitySchema::builder("Person")
                    .namespace("hr")
                    .property(PropertyDef::string("name"))
                    .build(),
            )
            .unwrap();
        let crm = db
            .register_type(
                EntitySchema::builder("Person")
                    .namespace("crm")
                    .property(PropertyDef::string("name"))
                    .build(),
            )
            .unwrap();

        let a = hr.create([("name", "A".into())]).unwrap();
        let b = crm.create([("name", "B".into())]).unwrap();
        assert_eq!(a.id(), "1");
        assert_eq!(b.id(), "1");
        assert_eq!(a.key().to_string(), "hr::Person@1");
        assert_ne!(a, b);

        assert!(matches!(
            db.resolve_type("Person", None),
            Err(CoreError::Resolution { .. })
        ));
        assert_eq!(
            db.resolve_type("Person", Some("crm")).unwrap().qualified_name(),
            "crm::Person"
        );
        assert_eq!(db.entity_type("Person").unwrap().qualified_name(), "hr::Person");
        assert_eq!(db.type_names(), vec!["crm::Person", "hr::Person"]);
    }

    #[test]
    fn subtypes_share_alias_lookup() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let staff = db
            .register_type(
                EntitySchema::builder("Employee")
                    .property(PropertyDef::string("title"))
                    .extends("Person")
                    .build(),
            )
            .unwrap();

        let eve = staff
            .create([("name", "Eve".into()), ("title", "CTO".into())])
            .unwrap();
        people.create([("name", "Adam".into())]).unwrap();

        assert_eq!(people.by_alias("Eve").unwrap(), eve);
        assert_eq!(people.instances().unwrap().len(), 2);
        assert_eq!(staff.instances().unwrap(), vec![eve]);
    }

    #[test]
    fn audit_records_each_accepted_mutation() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let john = people.create([("name", "John".into())]).unwrap();
        john.set("age", 30).unwrap();
        john.set("age", 30).unwrap();
        john.delete().unwrap();

        let audit = db.get_audit(0, 100).unwrap();
        let ops: Vec<Action> = audit.iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec![Action::Create, Action::Modify, Action::Delete]);
        assert_eq!(audit[0].id, AuditId::new(0));
        assert_eq!(audit[1].key, "Person@1");
        assert_eq!(audit[1].timestamp, 1_000);
        assert_eq!(audit[1].payload["age"], serde_json::json!(30));
        assert_eq!(audit[2].payload["name"], serde_json::json!("John"));

        let exported = db.export_audit().unwrap();
        assert_eq!(exported.len(), 3);
        assert_eq!(exported["1"][0], serde_json::json!("modify"));
    }

    #[test]
    fn audit_can_be_disabled() {
        let db = Database::open_with_config(Config::new().audit_enabled(false)).unwrap();
        let people = db.register_type(person_schema()).unwrap();
        people.create([("name", "John".into())]).unwrap();
        assert_eq!(db.audit_len().unwrap(), 0);
    }

    #[test]
    fn audit_subscribers_see_new_records() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let rx = db.subscribe_audit();

        people.create([("name", "John".into())]).unwrap();

        let record = rx.try_recv().unwrap();
        assert_eq!(record.operation, Action::Create);
        assert_eq!(record.key, "Person@1");
    }

    #[test]
    fn load_some_pages_in_id_order() {
        let db = Database::open_with_config(Config::new().max_page_size(3)).unwrap();
        let people = db.register_type(person_schema()).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            people.create([("name", name.into())]).unwrap();
        }

        let page: Vec<String> = people
            .load_some(1, 2)
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(page, vec!["2", "3"]);
        assert_eq!(people.load_some(0, 100).unwrap().len(), 3);
        assert!(people.load_some(10, 2).unwrap().is_empty());
        assert!(matches!(
            people.load_some(0, 0),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn ids_sort_numerically() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        for _ in 0..11 {
            people.create_empty().unwrap();
        }
        let ids: Vec<String> = people
            .instances()
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids.first().map(String::as_str), Some("1"));
        assert_eq!(ids.last().map(String::as_str), Some("11"));
    }

    #[test]
    fn explicit_ids_advance_the_sequence() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();

        people.create_with_id("10", [("name", "Ten".into())]).unwrap();
        assert_eq!(people.max_id().unwrap(), 10);
        assert!(matches!(
            people.create_with_id("10", std::iter::empty::<(String, Value)>()),
            Err(CoreError::DuplicateEntity { .. })
        ));

        people.create_with_id("abc", [("name", "Letters".into())]).unwrap();
        assert_eq!(people.max_id().unwrap(), 10);
        assert_eq!(people.create_empty().unwrap().id(), "11");
    }

    #[test]
    fn timestamped_types_track_callers() {
        let db = create_db();
        let docs = db
            .register_type(
                EntitySchema::builder("Doc")
                    .property(PropertyDef::string("body"))
                    .timestamped()
                    .build(),
            )
            .unwrap();

        let doc = db.with_caller("alice", || docs.create([("body", "v1".into())]).unwrap());
        assert_eq!(doc.creator().unwrap().as_deref(), Some("alice"));
        assert_eq!(doc.owner().unwrap().as_deref(), Some("alice"));
        assert_eq!(doc.created_at().unwrap(), Some(1_000));

        db.time().set_time(2_000);
        {
            let _guard = db.as_user("bob");
            doc.set("body", "v2").unwrap();
        }
        assert_eq!(doc.updater().unwrap().as_deref(), Some("bob"));
        assert_eq!(doc.updated_at().unwrap(), Some(2_000));
        assert_eq!(doc.created_at().unwrap(), Some(1_000));

        doc.set_owner("carol").unwrap();
        assert_eq!(doc.owner().unwrap().as_deref(), Some("carol"));
        assert_eq!(doc.creator().unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn linking_stamps_timestamped_partners() {
        let db = create_db();
        let people = db
            .register_type(
                EntitySchema::builder("Person")
                    .property(PropertyDef::string("name"))
                    .relation(RelationDef::many_to_one("mother", "Person", "children"))
                    .relation(RelationDef::one_to_many("children", "Person", "mother"))
                    .timestamped()
                    .build(),
            )
            .unwrap();
        let (mary, peter) = db.with_caller("alice", || {
            (
                people.create([("name", "Mary".into())]).unwrap(),
                people.create([("name", "Peter".into())]).unwrap(),
            )
        });

        db.time().set_time(2_000);
        {
            let _guard = db.as_user("bob");
            peter.set_ref("mother", Some(&mary)).unwrap();
        }
        assert_eq!(peter.updated_at().unwrap(), Some(2_000));
        assert_eq!(mary.updated_at().unwrap(), Some(2_000));
        assert_eq!(mary.updater().unwrap().as_deref(), Some("bob"));

        db.time().set_time(3_000);
        let kid = db.with_caller("carol", || {
            people
                .create([("name", "Kid".into()), ("mother", Value::from(mary.id()))])
                .unwrap()
        });
        assert_eq!(kid.updated_at().unwrap(), Some(3_000));
        assert_eq!(mary.updated_at().unwrap(), Some(3_000));
        assert_eq!(mary.updater().unwrap().as_deref(), Some("carol"));

        db.time().set_time(4_000);
        peter.delete().unwrap();
        assert_eq!(mary.updated_at().unwrap(), Some(4_000));
        assert_eq!(mary.get_refs("children").unwrap(), vec![kid]);
    }

    #[test]
    fn set_owner_requires_timestamped_type() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let john = people.create([("name", "John".into())]).unwrap();
        assert!(matches!(
            john.set_owner("alice"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn export_and_import_restore_links() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let mary = people.create([("name", "Mary".into())]).unwrap();
        let peter = people.create([("name", "Peter".into())]).unwrap();
        peter.set_ref("mother", Some(&mary)).unwrap();

        let export = db.export().unwrap();
        assert_eq!(export["Person"].len(), 2);
        assert_eq!(export["Person"]["2"]["mother"], serde_json::json!("1"));

        let text = db.dump_json(false).unwrap();
        let copy = create_db();
        let copied = copy.register_type(person_schema()).unwrap();
        assert_eq!(copy.import_json(&text).unwrap(), 2);

        let peter = copied.by_alias("Peter").unwrap();
        let mary = copied.by_alias("Mary").unwrap();
        assert_eq!(peter.get_ref("mother").unwrap(), Some(mary.clone()));
        assert_eq!(mary.get_refs("children").unwrap(), vec![peter]);
        assert_eq!(copied.count().unwrap(), 2);
        assert_eq!(copied.max_id().unwrap(), 2);
        assert_eq!(copy.export().unwrap(), export);
    }

    #[test]
    fn raw_dump_includes_counters() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        people.create([("name", "John".into())]).unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&db.raw_dump_json(false).unwrap()).unwrap();
        assert_eq!(raw["_system@Person_id"], "\"1\"");
        assert_eq!(raw["_system@Person_count"], "\"1\"");
        assert_eq!(raw["Person_alias@John"], "\"1\"");
        assert!(raw.contains_key("Person@1"));
    }

    #[test]
    fn reopen_rebuilds_missing_counters() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        for name in ["a", "b", "c"] {
            people.create([("name", name.into())]).unwrap();
        }
        people.load("2").unwrap().delete().unwrap();

        let mut data: BTreeMap<String, String> =
            db.records().items().unwrap().into_iter().collect();
        data.retain(|key, _| !key.starts_with("_system@"));

        let reopened = Database::open_with_stores(
            Config::new(),
            Box::new(InMemoryStore::with_data(data)),
            Box::new(InMemoryStore::new()),
        )
        .unwrap();
        let people = reopened.register_type(person_schema()).unwrap();
        assert_eq!(people.count().unwrap(), 2);
        assert_eq!(people.max_id().unwrap(), 3);
        assert_eq!(people.create_empty().unwrap().id(), "4");
    }

    #[test]
    fn clear_keeps_registrations() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        people.create([("name", "John".into())]).unwrap();

        db.clear().unwrap();

        assert_eq!(people.count().unwrap(), 0);
        assert_eq!(db.audit_len().unwrap(), 0);
        assert!(db.export().unwrap().is_empty());
        assert_eq!(people.create_empty().unwrap().id(), "1");
        assert_eq!(db.type_names(), vec!["Person"]);
    }

    #[test]
    fn find_by_compares_coerced_values() {
        let db = create_db();
        let people = db.register_type(person_schema()).unwrap();
        let john = people
            .create([("name", "John".into()), ("age", Value::from(30))])
            .unwrap();
        people
            .create([("name", "Ann".into()), ("age", Value::from(25))])
            .unwrap();

        assert_eq!(people.find_by("age", "30").unwrap(), vec![john]);
        assert!(people.find_by("nope", 1).is_err());
    }
}

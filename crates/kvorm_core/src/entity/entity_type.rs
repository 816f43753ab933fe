//! Type-level entity operations.

use crate::database::Database;
use crate::entity::handle::{alias_text, Entity};
use crate::entity::links::{resolve_link, Link};
use crate::entity::store::Counter;
use crate::error::{CoreError, CoreResult};
use crate::hooks::Action;
use crate::schema::EntitySchema;
use crate::types::{compare_ids, EntityKey};
use kvorm_codec::{
    Record, Value, CREATED_FIELD, CREATOR_FIELD, ID_FIELD, OWNER_FIELD, UPDATED_FIELD,
    UPDATER_FIELD,
};
use std::sync::Arc;
use tracing::debug;

/// A handle to a registered entity type.
///
/// Returned by [`Database::register_type`], [`Database::entity_type`] and
/// [`Database::resolve_type`]. Creates, loads and enumerates entities of the
/// type.
#[derive(Clone)]
pub struct EntityType<'db> {
    db: &'db Database,
    schema: Arc<EntitySchema>,
}

impl<'db> EntityType<'db> {
    pub(crate) fn new(db: &'db Database, schema: Arc<EntitySchema>) -> Self {
        Self { db, schema }
    }

    /// Returns the bare type name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns the qualified type name.
    pub fn qualified_name(&self) -> String {
        self.schema.qualified_name()
    }

    /// Returns the type declaration, with inherited fields merged in.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Creates an entity with the next id in the type's sequence.
    ///
    /// Every field value is validated and shown to the hook before the id is
    /// assigned. Relationship fields take partner ids (a list for to-many
    /// fields); once the record is persisted they are linked like
    /// [`Entity::set_ref_id`] and [`Entity::set_ref_ids`] would, updating the
    /// partners' inverse fields. The creation is audited once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for invalid or missing required
    /// values, [`CoreError::NotFound`] for missing partners,
    /// [`CoreError::PermissionDenied`] if the hook rejects, and
    /// [`CoreError::InvalidOperation`] for undeclared fields. On error no id
    /// is consumed and nothing is persisted.
    pub fn create<I, K>(&self, fields: I) -> CoreResult<Entity<'db>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.create_inner(None, fields)
    }

    /// Creates an entity under an explicit id.
    ///
    /// A numeric id above the current maximum advances the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateEntity`] if the id is taken, plus the
    /// errors of [`EntityType::create`].
    pub fn create_with_id<I, K>(&self, id: &str, fields: I) -> CoreResult<Entity<'db>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        if id.is_empty() {
            return Err(CoreError::invalid_operation("entity id must not be empty"));
        }
        self.create_inner(Some(id), fields)
    }

    /// Creates an entity with every field at its default.
    pub fn create_empty(&self) -> CoreResult<Entity<'db>> {
        self.create_inner(None, std::iter::empty::<(String, Value)>())
    }

    fn create_inner<I, K>(&self, explicit_id: Option<&str>, fields: I) -> CoreResult<Entity<'db>>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let qualified = self.qualified_name();
        let records = self.db.records();
        let max_id = self.max_id()?;
        let id = match explicit_id {
            Some(id) => id.to_string(),
            None => (max_id + 1).to_string(),
        };
        let key = EntityKey::new(qualified.clone(), id.clone());
        if records.exists(&key)? {
            return Err(match explicit_id {
                Some(_) => CoreError::duplicate(key.to_string()),
                None => CoreError::consistency(format!("{key} exists above the id counter")),
            });
        }

        let entity = Entity::new(self.db, Arc::clone(&self.schema), id.clone());
        let mut record = Record::new(qualified.clone(), id.clone());
        for property in &self.schema.properties {
            record.set(property.name.clone(), property.initial_value());
        }
        for relation in &self.schema.relations {
            record.set(relation.name.clone(), relation.kind.empty_value());
        }
        if self.schema.timestamped {
            let now = Value::Integer(self.db.time().now());
            let caller = Value::String(self.db.get_caller_id());
            record.set(CREATED_FIELD, now.clone());
            record.set(UPDATED_FIELD, now);
            record.set(CREATOR_FIELD, caller.clone());
            record.set(UPDATER_FIELD, caller.clone());
            record.set(OWNER_FIELD, caller);
        }

        entity.intercept(&record, None, &Value::Null, Value::Null, Action::Create)?;
        let mut links: Vec<(Link, Value)> = Vec::new();
        for (field, value) in fields {
            let field = field.into();
            let Some(property) = self.schema.property(&field) else {
                let Some(relation) = self.schema.relation(&field) else {
                    return Err(CoreError::invalid_operation(format!(
                        "{qualified} has no field '{field}'"
                    )));
                };
                let link = resolve_link(self.db, &self.schema, relation)?;
                let proposed = link.check_value(self.db, &value)?;
                let old = relation.kind.empty_value();
                let accepted =
                    entity.intercept(&record, Some(&field), &old, proposed, Action::Create)?;
                let accepted = link.check_value(self.db, &accepted)?;
                links.retain(|(pending, _)| pending.relation.name != field);
                links.push((link, accepted));
                continue;
            };
            let proposed = property.validate(&value)?;
            let old = record.get(&field).cloned().unwrap_or(Value::Null);
            let accepted =
                entity.intercept(&record, Some(&field), &old, proposed, Action::Create)?;
            let accepted = property.validate(&accepted)?;
            record.set(field, accepted);
        }
        for property in self.schema.properties.iter().filter(|p| p.required) {
            if record.get(&property.name).map_or(true, Value::is_null) {
                return Err(CoreError::validation(
                    &property.name,
                    Value::Null,
                    "field is required",
                ));
            }
        }
        let alias = entity.alias_value(&record);
        if let Some(alias) = &alias {
            entity.check_alias_free(alias)?;
        }

        records.save(&key, &record)?;
        let assigned = id.parse::<u64>().ok().filter(|n| *n > max_id);
        if let Some(n) = assigned {
            records.set_counter(&qualified, Counter::MaxId, n)?;
        }
        self.db.adjust_count(&qualified, 1)?;
        if let Some(alias) = &alias {
            records.alias_set(&qualified, alias, &id)?;
        }
        for (link, value) in links {
            if let Some(linked) = entity.apply_link(&link, record.clone(), value, false)? {
                record = linked;
            }
        }
        debug!(key = %key, "entity created");
        self.db.record_audit(Action::Create, &key, &record)?;
        Ok(entity)
    }

    /// Loads an entity by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no entity of this exact type has
    /// the id.
    pub fn load(&self, id: &str) -> CoreResult<Entity<'db>> {
        self.find(id)?.ok_or_else(|| {
            CoreError::not_found(EntityKey::new(self.qualified_name(), id).to_string())
        })
    }

    /// Finds an entity by id.
    pub fn find(&self, id: &str) -> CoreResult<Option<Entity<'db>>> {
        let key = EntityKey::new(self.qualified_name(), id);
        if !self.db.records().exists(&key)? {
            return Ok(None);
        }
        Ok(Some(Entity::new(self.db, Arc::clone(&self.schema), id)))
    }

    /// Loads an entity by its alias value.
    ///
    /// Subtypes sharing the alias field are searched after the type itself.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no entity holds the alias, and
    /// [`CoreError::InvalidOperation`] if the type has no alias field.
    pub fn by_alias(&self, value: impl Into<Value>) -> CoreResult<Entity<'db>> {
        let value = value.into();
        self.find_by_alias(value.clone())?.ok_or_else(|| {
            CoreError::not_found(format!("{}_alias@{value}", self.qualified_name()))
        })
    }

    /// Finds an entity by its alias value.
    pub fn find_by_alias(&self, value: impl Into<Value>) -> CoreResult<Option<Entity<'db>>> {
        if self.schema.alias.is_none() {
            return Err(CoreError::invalid_operation(format!(
                "{} has no alias field",
                self.qualified_name()
            )));
        }
        let Some(alias) = alias_text(&value.into()) else {
            return Ok(None);
        };
        for schema in self.family() {
            let qualified = schema.qualified_name();
            if let Some(id) = self.db.records().alias_get(&qualified, &alias)? {
                let key = EntityKey::new(qualified, id.clone());
                if self.db.records().exists(&key)? {
                    return Ok(Some(Entity::new(self.db, schema, id)));
                }
            }
        }
        Ok(None)
    }

    /// Finds an entity by id, then by alias.
    pub fn get(&self, id_or_alias: &str) -> CoreResult<Option<Entity<'db>>> {
        if let Some(entity) = self.find(id_or_alias)? {
            return Ok(Some(entity));
        }
        if self.schema.alias.is_none() {
            return Ok(None);
        }
        self.find_by_alias(id_or_alias)
    }

    /// Returns every entity of this type and its registered subtypes, in
    /// ascending id order.
    pub fn instances(&self) -> CoreResult<Vec<Entity<'db>>> {
        let mut entities = Vec::new();
        for schema in self.family() {
            for id in self.db.records().ids(&schema.qualified_name())? {
                entities.push(Entity::new(self.db, Arc::clone(&schema), id));
            }
        }
        entities.sort_by(|a, b| {
            compare_ids(a.id(), b.id()).then_with(|| a.type_name().cmp(b.type_name()))
        });
        Ok(entities)
    }

    /// Returns the number of live entities of exactly this type.
    pub fn count(&self) -> CoreResult<u64> {
        Ok(self
            .db
            .records()
            .counter(&self.qualified_name(), Counter::Count)?
            .unwrap_or(0))
    }

    /// Returns the highest id assigned in this type's sequence.
    pub fn max_id(&self) -> CoreResult<u64> {
        Ok(self
            .db
            .records()
            .counter(&self.qualified_name(), Counter::MaxId)?
            .unwrap_or(0))
    }

    /// Returns up to `limit` entities of exactly this type, skipping the
    /// first `offset` in ascending id order.
    ///
    /// Limits above [`crate::Config::max_page_size`] are clamped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `limit` is zero.
    pub fn load_some(&self, offset: usize, limit: usize) -> CoreResult<Vec<Entity<'db>>> {
        if limit == 0 {
            return Err(CoreError::invalid_operation("page limit must be at least 1"));
        }
        let limit = limit.min(self.db.config().max_page_size.max(1));
        let mut ids = self.db.records().ids(&self.qualified_name())?;
        ids.sort_by(|a, b| compare_ids(a, b));
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|id| Entity::new(self.db, Arc::clone(&self.schema), id))
            .collect())
    }

    /// Returns the instances whose `field` equals `value`.
    ///
    /// Property values are coerced the same way writes are before comparing.
    pub fn find_by(&self, field: &str, value: impl Into<Value>) -> CoreResult<Vec<Entity<'db>>> {
        let value = value.into();
        let value = match self.schema.property(field) {
            Some(property) => property.validate(&value)?,
            None if self.schema.declares(field) || field.starts_with('_') => value,
            None => {
                return Err(CoreError::invalid_operation(format!(
                    "{} has no field '{field}'",
                    self.qualified_name()
                )))
            }
        };
        let mut matches = Vec::new();
        for entity in self.instances()? {
            if entity.get(field)? == value {
                matches.push(entity);
            }
        }
        Ok(matches)
    }

    /// Updates the entity a record identifies, or creates it.
    ///
    /// The entity is located by `_id`, then by alias. Only scalar properties
    /// are written; relationship fields and unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the record's `_type` names
    /// another type, plus the errors of [`Entity::set`] and
    /// [`EntityType::create`].
    pub fn upsert(&self, record: &Record) -> CoreResult<Entity<'db>> {
        let qualified = self.qualified_name();
        if let Some(type_name) = record.type_name() {
            if type_name != qualified {
                return Err(CoreError::invalid_operation(format!(
                    "record of type {type_name} cannot be upserted as {qualified}"
                )));
            }
        }

        let id = record.get(ID_FIELD).and_then(alias_text);
        let mut existing = match &id {
            Some(id) => self.find(id)?,
            None => None,
        };
        if existing.is_none() {
            if let Some(alias) = self.schema.alias.as_deref().and_then(|f| record.get(f)) {
                existing = self.find_by_alias(alias.clone())?;
            }
        }

        let fields: Vec<(String, Value)> = record
            .user_fields()
            .filter(|(field, _)| self.schema.property(field).is_some())
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect();

        match existing {
            Some(entity) => {
                for (field, value) in fields {
                    entity.set(&field, value)?;
                }
                Ok(entity)
            }
            None => match &id {
                Some(id) => self.create_with_id(id, fields),
                None => self.create(fields),
            },
        }
    }

    /// The type itself followed by its registered descendants.
    fn family(&self) -> Vec<Arc<EntitySchema>> {
        let registry = self.db.registry();
        let mut family = vec![Arc::clone(&self.schema)];
        family.extend(
            registry
                .descendants(&self.qualified_name())
                .iter()
                .filter_map(|name| registry.get(name)),
        );
        family
    }
}

impl std::fmt::Debug for EntityType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityType")
            .field(&self.schema.qualified_name())
            .finish()
    }
}

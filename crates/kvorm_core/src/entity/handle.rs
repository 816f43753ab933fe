//! Entity instance handles.

use crate::database::Database;
use crate::entity::links;
use crate::entity::WorkingSet;
use crate::error::{CoreError, CoreResult};
use crate::hooks::{Action, HookDecision, HookEvent};
use crate::schema::EntitySchema;
use crate::types::EntityKey;
use kvorm_codec::{
    Record, Value, CREATED_FIELD, CREATOR_FIELD, ID_FIELD, OWNER_FIELD, TYPE_FIELD,
    UPDATED_FIELD, UPDATER_FIELD,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A handle to one stored entity.
///
/// Handles hold only the entity's type and id. Every read loads the current
/// record and every write re-persists it, so handles never go stale while the
/// entity exists. After [`Entity::delete`] every operation fails with
/// [`CoreError::StaleEntity`].
#[derive(Clone)]
pub struct Entity<'db> {
    db: &'db Database,
    schema: Arc<EntitySchema>,
    key: EntityKey,
}

impl<'db> Entity<'db> {
    pub(crate) fn new(db: &'db Database, schema: Arc<EntitySchema>, id: impl Into<String>) -> Self {
        let key = EntityKey::new(schema.qualified_name(), id);
        Self { db, schema, key }
    }

    /// Returns the entity id.
    pub fn id(&self) -> &str {
        &self.key.id
    }

    /// Returns the storage key.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Returns the qualified type name.
    pub fn type_name(&self) -> &str {
        &self.key.type_name
    }

    /// Returns the entity's type declaration.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Returns the database the entity lives in.
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Returns true until the entity is deleted.
    pub fn exists(&self) -> CoreResult<bool> {
        self.db.records().exists(&self.key)
    }

    /// Returns the current stored record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleEntity`] if the entity was deleted.
    pub fn to_record(&self) -> CoreResult<Record> {
        self.db
            .records()
            .load(&self.key)?
            .ok_or_else(|| CoreError::stale(self.key.to_string()))
    }

    /// Returns the current stored record as a JSON object.
    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        Ok(self.to_record()?.to_json())
    }

    /// Reads a field.
    ///
    /// Properties that were never written read as their declared default.
    /// Relationship fields read as ids, system fields as stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for undeclared fields.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        let record = self.to_record()?;
        if let Some(value) = record.get(field) {
            if field.starts_with('_') || self.schema.declares(field) {
                return Ok(value.clone());
            }
        }
        if let Some(property) = self.schema.property(field) {
            return Ok(property.initial_value());
        }
        if let Some(relation) = self.schema.relation(field) {
            return Ok(relation.kind.empty_value());
        }
        if is_system_field(field) {
            return Ok(Value::Null);
        }
        Err(CoreError::invalid_operation(format!(
            "{} has no field '{field}'",
            self.key.type_name
        )))
    }

    /// Returns the current owner of a timestamped entity.
    pub fn owner(&self) -> CoreResult<Option<String>> {
        self.system_str(OWNER_FIELD)
    }

    /// Returns the caller that created a timestamped entity.
    pub fn creator(&self) -> CoreResult<Option<String>> {
        self.system_str(CREATOR_FIELD)
    }

    /// Returns the caller that last updated a timestamped entity.
    pub fn updater(&self) -> CoreResult<Option<String>> {
        self.system_str(UPDATER_FIELD)
    }

    /// Returns the creation time of a timestamped entity, in ms.
    pub fn created_at(&self) -> CoreResult<Option<i64>> {
        Ok(self.to_record()?.get(CREATED_FIELD).and_then(Value::as_integer))
    }

    /// Returns the last update time of a timestamped entity, in ms.
    pub fn updated_at(&self) -> CoreResult<Option<i64>> {
        Ok(self.to_record()?.get(UPDATED_FIELD).and_then(Value::as_integer))
    }

    /// Writes a scalar property.
    ///
    /// The value is validated, shown to the type's hook, validated again if
    /// the hook substituted it, then persisted and audited. A write that
    /// leaves the record unchanged persists nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for invalid values,
    /// [`CoreError::PermissionDenied`] if the hook rejects the write, and
    /// [`CoreError::InvalidOperation`] for relationship or undeclared fields.
    /// On error nothing is persisted.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let mut record = self.to_record()?;
        let Some(property) = self.schema.property(field) else {
            return Err(self.not_a_property(field));
        };

        let proposed = property.validate(&value.into())?;
        let old = record.get(field).cloned().unwrap_or(Value::Null);
        let accepted = self.intercept(&record, Some(field), &old, proposed, Action::Modify)?;
        let accepted = property.validate(&accepted)?;
        if accepted == old {
            return Ok(());
        }

        let alias_change = if self.schema.alias.as_deref() == Some(field) {
            let new_alias = alias_text(&accepted);
            if let Some(alias) = &new_alias {
                self.check_alias_free(alias)?;
            }
            Some((alias_text(&old), new_alias))
        } else {
            None
        };

        record.set(field, accepted);
        self.stamp_update(&mut record);
        self.db.records().save(&self.key, &record)?;

        if let Some((old_alias, new_alias)) = alias_change {
            if let Some(alias) = old_alias {
                self.db
                    .records()
                    .alias_remove(&self.key.type_name, &alias, self.id())?;
            }
            if let Some(alias) = new_alias {
                self.db
                    .records()
                    .alias_set(&self.key.type_name, &alias, self.id())?;
            }
        }
        self.db.record_audit(Action::Modify, &self.key, &record)
    }

    /// Transfers ownership of a timestamped entity.
    ///
    /// The hook sees this as a modify of the `_owner` field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the type is not
    /// timestamped, and [`CoreError::PermissionDenied`] if the hook rejects.
    pub fn set_owner(&self, owner: &str) -> CoreResult<()> {
        if !self.schema.timestamped {
            return Err(CoreError::invalid_operation(format!(
                "{} is not timestamped",
                self.key.type_name
            )));
        }
        let mut record = self.to_record()?;
        let old = record.get(OWNER_FIELD).cloned().unwrap_or(Value::Null);
        let accepted = self.intercept(
            &record,
            Some(OWNER_FIELD),
            &old,
            Value::from(owner),
            Action::Modify,
        )?;
        if !matches!(accepted, Value::String(_)) {
            return Err(CoreError::validation(
                OWNER_FIELD,
                &accepted,
                "owner must be a string",
            ));
        }
        if accepted == old {
            return Ok(());
        }
        record.set(OWNER_FIELD, accepted);
        self.stamp_update(&mut record);
        self.db.records().save(&self.key, &record)?;
        self.db.record_audit(Action::Modify, &self.key, &record)
    }

    /// Deletes the entity.
    ///
    /// Removes it from every relationship field of every related entity, drops
    /// its alias entry and decrements the type's count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleEntity`] if already deleted, and
    /// [`CoreError::PermissionDenied`] if the hook rejects.
    pub fn delete(&self) -> CoreResult<()> {
        let record = self.to_record()?;
        self.intercept(&record, None, &Value::Null, Value::Null, Action::Delete)?;

        let mut ws = WorkingSet::new(self.db.records());
        for relation in &self.schema.relations {
            let ids = crate::relation::linked_ids(&record, relation.kind, &relation.name);
            if ids.is_empty() {
                continue;
            }
            let link = links::resolve_link(self.db, &self.schema, relation)?;
            for id in ids {
                let key = link.target_key(&id);
                if let Some(target) = ws.get_mut(&key)? {
                    crate::relation::detach(target, link.inverse.kind, &link.inverse.name, self.id());
                }
            }
        }
        ws.forget(&self.key);
        self.db.flush_touched(ws)?;

        if let Some(alias) = self.alias_value(&record) {
            self.db
                .records()
                .alias_remove(&self.key.type_name, &alias, self.id())?;
        }
        self.db.adjust_count(&self.key.type_name, -1)?;
        self.db.records().remove(&self.key)?;
        debug!(key = %self.key, "entity deleted");
        self.db.record_audit(Action::Delete, &self.key, &record)
    }

    /// Runs the type's hook, returning the accepted value.
    pub(crate) fn intercept(
        &self,
        record: &Record,
        field: Option<&str>,
        old: &Value,
        new: Value,
        action: Action,
    ) -> CoreResult<Value> {
        let Some(hook) = self.schema.hook.clone() else {
            return Ok(new);
        };
        let event = HookEvent {
            entity: self,
            record,
            field,
            old_value: old,
            new_value: &new,
            action,
        };
        match hook.on_event(&event) {
            HookDecision::Accept(value) => Ok(value),
            HookDecision::Reject => {
                debug!(key = %self.key, field, action = %action, "hook rejected mutation");
                Err(CoreError::permission_denied(
                    self.key.to_string(),
                    field,
                    action.as_str(),
                ))
            }
        }
    }

    /// Stamps `_timestamp_updated` and `_updater` on timestamped types.
    pub(crate) fn stamp_update(&self, record: &mut Record) {
        if self.schema.timestamped {
            record.set(UPDATED_FIELD, Value::Integer(self.db.time().now()));
            record.set(UPDATER_FIELD, Value::String(self.db.get_caller_id()));
        }
    }

    /// Returns the alias value held by `record`, if the type has an alias.
    pub(crate) fn alias_value(&self, record: &Record) -> Option<String> {
        let field = self.schema.alias.as_deref()?;
        record.get(field).and_then(alias_text)
    }

    /// Fails if `alias` already names another live entity of this type.
    pub(crate) fn check_alias_free(&self, alias: &str) -> CoreResult<()> {
        let records = self.db.records();
        match records.alias_get(&self.key.type_name, alias)? {
            Some(other) if other != self.id() => {
                let holder = EntityKey::new(self.key.type_name.clone(), other);
                if records.exists(&holder)? {
                    return Err(CoreError::duplicate(format!(
                        "{}_alias@{alias}",
                        self.key.type_name
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn system_str(&self, field: &str) -> CoreResult<Option<String>> {
        Ok(self
            .to_record()?
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn not_a_property(&self, field: &str) -> CoreError {
        if self.schema.relation(field).is_some() {
            CoreError::invalid_operation(format!(
                "'{field}' is a relationship; use set_ref, set_refs, add_ref or remove_ref"
            ))
        } else {
            CoreError::invalid_operation(format!(
                "{} has no property '{field}'",
                self.key.type_name
            ))
        }
    }
}

/// Renders a property value as an alias key component.
pub(crate) fn alias_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_system_field(field: &str) -> bool {
    [
        TYPE_FIELD,
        ID_FIELD,
        OWNER_FIELD,
        CREATOR_FIELD,
        UPDATER_FIELD,
        CREATED_FIELD,
        UPDATED_FIELD,
    ]
    .contains(&field)
}

impl PartialEq for Entity<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entity<'_> {}

impl fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entity").field(&self.key.to_string()).finish()
    }
}

impl fmt::Display for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

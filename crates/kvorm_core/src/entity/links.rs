//! Relationship reads and writes.
//!
//! Every write updates the subject's field first, then the inverse fields of
//! the partners it gained or lost, and persists all touched records together.
//! Only the subject's hook runs; inverse bookkeeping follows from the
//! accepted write.

use crate::database::Database;
use crate::entity::handle::Entity;
use crate::entity::working_set::WorkingSet;
use crate::error::{CoreError, CoreResult};
use crate::hooks::Action;
use crate::relation::{attach, detach, linked_ids, RelationDef};
use crate::schema::EntitySchema;
use crate::types::EntityKey;
use kvorm_codec::{Record, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// A relationship field resolved against the registry.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub relation: RelationDef,
    pub target: Arc<EntitySchema>,
    pub inverse: RelationDef,
}

impl Link {
    pub(crate) fn target_key(&self, id: &str) -> EntityKey {
        EntityKey::new(self.target.qualified_name(), id)
    }

    /// Checks a value for this relationship field and returns it with
    /// duplicate ids dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for values of the wrong shape and
    /// [`CoreError::NotFound`] if a referenced partner does not exist.
    pub(crate) fn check_value(&self, db: &Database, value: &Value) -> CoreResult<Value> {
        let field = self.relation.name.as_str();
        let ids = if self.relation.kind.is_to_many() {
            value
                .as_id_list()
                .map(dedup)
                .ok_or_else(|| CoreError::validation(field, value, "must be a list of entity ids"))?
        } else {
            match value {
                Value::Null => Vec::new(),
                Value::String(id) => vec![id.clone()],
                other => {
                    return Err(CoreError::validation(
                        field,
                        other,
                        "must be an entity id or null",
                    ))
                }
            }
        };
        for id in &ids {
            let key = self.target_key(id);
            if !db.records().exists(&key)? {
                return Err(CoreError::not_found(key.to_string()));
            }
        }
        if self.relation.kind.is_to_many() {
            Ok(Value::id_list(ids))
        } else {
            Ok(value.clone())
        }
    }

    fn check_target(&self, entity: &Entity<'_>) -> CoreResult<()> {
        let expected = self.target.qualified_name();
        if entity.type_name() != expected {
            return Err(CoreError::invalid_operation(format!(
                "'{}' links {expected} entities, not {}",
                self.relation.name,
                entity.type_name()
            )));
        }
        if !entity.exists()? {
            return Err(CoreError::stale(entity.key().to_string()));
        }
        Ok(())
    }
}

/// Resolves a relationship's target type and inverse field.
///
/// # Errors
///
/// Returns [`CoreError::Resolution`] if the target is unknown or ambiguous,
/// the inverse field is missing, its kind does not mirror `relation.kind`, or
/// it does not point back at `schema`.
pub(crate) fn resolve_link(
    db: &Database,
    schema: &EntitySchema,
    relation: &RelationDef,
) -> CoreResult<Link> {
    let qualified = schema.qualified_name();
    let (target, inverse, back) = {
        let registry = db.registry();
        let target = registry.resolve(&relation.target, schema.namespace.as_deref())?;
        let inverse = target.relation(&relation.inverse).cloned().ok_or_else(|| {
            CoreError::resolution(format!(
                "{}.{}: {} has no inverse field '{}'",
                qualified,
                relation.name,
                target.qualified_name(),
                relation.inverse
            ))
        })?;
        let back = registry.resolve(&inverse.target, target.namespace.as_deref())?;
        (target, inverse, back)
    };

    if inverse.kind != relation.kind.inverse() {
        return Err(CoreError::resolution(format!(
            "{}.{} is {} but inverse {}.{} is {}",
            qualified,
            relation.name,
            relation.kind.name(),
            target.qualified_name(),
            inverse.name,
            inverse.kind.name()
        )));
    }
    if back.qualified_name() != qualified {
        return Err(CoreError::resolution(format!(
            "inverse {}.{} targets {}, not {}",
            target.qualified_name(),
            inverse.name,
            back.qualified_name(),
            qualified
        )));
    }
    Ok(Link {
        relation: relation.clone(),
        target,
        inverse,
    })
}

impl<'db> Entity<'db> {
    /// Returns the partner held by a to-one relationship field.
    pub fn get_ref(&self, field: &str) -> CoreResult<Option<Entity<'db>>> {
        let link = self.link_for(field, false)?;
        let record = self.to_record()?;
        Ok(linked_ids(&record, link.relation.kind, field)
            .into_iter()
            .next()
            .map(|id| Entity::new(self.database(), Arc::clone(&link.target), id)))
    }

    /// Returns the partners held by a to-many relationship field, in order.
    pub fn get_refs(&self, field: &str) -> CoreResult<Vec<Entity<'db>>> {
        let link = self.link_for(field, true)?;
        let record = self.to_record()?;
        Ok(linked_ids(&record, link.relation.kind, field)
            .into_iter()
            .map(|id| Entity::new(self.database(), Arc::clone(&link.target), id))
            .collect())
    }

    /// Sets or clears a to-one relationship field.
    ///
    /// The partner's inverse field is updated to match: for one-to-one the
    /// partner's previous partner is released, for many-to-one the entity is
    /// moved between the old and new partner's lists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for to-many fields or targets
    /// of the wrong type, [`CoreError::Resolution`] if the relationship is
    /// misdeclared, and [`CoreError::PermissionDenied`] if the hook rejects.
    pub fn set_ref(&self, field: &str, target: Option<&Entity<'_>>) -> CoreResult<()> {
        let link = self.link_for(field, false)?;
        let proposed = match target {
            Some(target) => {
                link.check_target(target)?;
                Value::from(target.id())
            }
            None => Value::Null,
        };
        self.write_to_one(&link, proposed)
    }

    /// Sets a to-one relationship field by partner id.
    pub fn set_ref_id(&self, field: &str, id: Option<&str>) -> CoreResult<()> {
        let link = self.link_for(field, false)?;
        self.write_to_one(&link, Value::from(id))
    }

    /// Replaces the contents of a to-many relationship field.
    ///
    /// Duplicates are dropped, keeping the first occurrence.
    pub fn set_refs<'a, 'b: 'a>(
        &self,
        field: &str,
        targets: impl IntoIterator<Item = &'a Entity<'b>>,
    ) -> CoreResult<()> {
        let link = self.link_for(field, true)?;
        let mut ids = Vec::new();
        for target in targets {
            link.check_target(target)?;
            ids.push(target.id().to_string());
        }
        self.write_to_many(&link, ids)
    }

    /// Replaces the contents of a to-many relationship field by partner ids.
    pub fn set_ref_ids<S: AsRef<str>>(&self, field: &str, ids: &[S]) -> CoreResult<()> {
        let link = self.link_for(field, true)?;
        let ids = ids.iter().map(|id| id.as_ref().to_string()).collect();
        self.write_to_many(&link, ids)
    }

    /// Adds a partner to a to-many relationship field. Adding an existing
    /// partner changes nothing.
    pub fn add_ref(&self, field: &str, target: &Entity<'_>) -> CoreResult<()> {
        let link = self.link_for(field, true)?;
        link.check_target(target)?;
        let mut ids = linked_ids(&self.to_record()?, link.relation.kind, field);
        if ids.iter().any(|id| id == target.id()) {
            return Ok(());
        }
        ids.push(target.id().to_string());
        self.write_to_many(&link, ids)
    }

    /// Removes a partner from a to-many relationship field. Removing a
    /// non-partner changes nothing.
    pub fn remove_ref(&self, field: &str, target: &Entity<'_>) -> CoreResult<()> {
        let link = self.link_for(field, true)?;
        let ids = linked_ids(&self.to_record()?, link.relation.kind, field);
        if !ids.iter().any(|id| id == target.id()) {
            return Ok(());
        }
        let ids = ids.into_iter().filter(|id| id != target.id()).collect();
        self.write_to_many(&link, ids)
    }

    fn link_for(&self, field: &str, to_many: bool) -> CoreResult<Link> {
        let relation = self.schema().relation(field).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{} has no relationship '{field}'",
                self.type_name()
            ))
        })?;
        if relation.kind.is_to_many() != to_many {
            let hint = if to_many {
                "to-one; use set_ref"
            } else {
                "to-many; use set_refs, add_ref or remove_ref"
            };
            return Err(CoreError::invalid_operation(format!(
                "'{field}' is {hint}"
            )));
        }
        resolve_link(self.database(), self.schema(), relation)
    }

    fn write_to_one(&self, link: &Link, proposed: Value) -> CoreResult<()> {
        let field = link.relation.name.as_str();
        let record = self.to_record()?;
        let old = record.get(field).cloned().unwrap_or(Value::Null);
        if proposed == old {
            return Ok(());
        }
        let accepted = self.intercept(&record, Some(field), &old, proposed, Action::Modify)?;
        let accepted = link.check_value(self.database(), &accepted)?;
        self.commit_link(link, record, accepted)
    }

    fn write_to_many(&self, link: &Link, proposed: Vec<String>) -> CoreResult<()> {
        let field = link.relation.name.as_str();
        let record = self.to_record()?;
        let old_ids = linked_ids(&record, link.relation.kind, field);
        let proposed = dedup(proposed);
        if proposed == old_ids {
            return Ok(());
        }
        let accepted = self.intercept(
            &record,
            Some(field),
            &Value::id_list(old_ids),
            Value::id_list(proposed),
            Action::Modify,
        )?;
        let accepted = link.check_value(self.database(), &accepted)?;
        self.commit_link(link, record, accepted)
    }

    fn commit_link(&self, link: &Link, record: Record, accepted: Value) -> CoreResult<()> {
        match self.apply_link(link, record, accepted, true)? {
            Some(record) => self
                .database()
                .record_audit(Action::Modify, self.key(), &record),
            None => Ok(()),
        }
    }

    /// Stores an accepted relationship value and updates the inverse fields
    /// of every partner gained or lost.
    ///
    /// `accepted` must have passed [`Link::check_value`]. No hook runs and
    /// nothing is audited. Returns the subject's new record, or `None` if the
    /// field already held `accepted`.
    pub(crate) fn apply_link(
        &self,
        link: &Link,
        mut record: Record,
        accepted: Value,
        stamp: bool,
    ) -> CoreResult<Option<Record>> {
        let field = link.relation.name.as_str();
        let kind = link.relation.kind;
        let old_ids = linked_ids(&record, kind, field);
        record.set(field, accepted);
        let new_ids = linked_ids(&record, kind, field);
        if new_ids == old_ids {
            return Ok(None);
        }
        if stamp {
            self.stamp_update(&mut record);
        }

        let mut ws = WorkingSet::new(self.database().records());
        ws.insert(self.key().clone(), record);
        for id in old_ids.iter().filter(|id| !new_ids.contains(id)) {
            if let Some(partner) = ws.get_mut(&link.target_key(id))? {
                detach(partner, link.inverse.kind, &link.inverse.name, self.id());
            }
        }
        for id in new_ids.iter().filter(|id| !old_ids.contains(id)) {
            let target_key = link.target_key(id);
            // A to-one inverse holds a single holder; it loses this partner.
            if !link.inverse.kind.is_to_many() {
                let holder = ws
                    .require_mut(&target_key)?
                    .get(&link.inverse.name)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(holder) = holder.filter(|h| h != self.id()) {
                    let holder_key = EntityKey::new(self.type_name(), holder);
                    if let Some(previous) = ws.get_mut(&holder_key)? {
                        detach(previous, kind, field, id);
                    }
                }
            }
            attach(
                ws.require_mut(&target_key)?,
                link.inverse.kind,
                &link.inverse.name,
                self.id(),
            );
        }

        let record = ws.require_mut(self.key())?.clone();
        self.database().flush_touched(ws)?;
        Ok(Some(record))
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

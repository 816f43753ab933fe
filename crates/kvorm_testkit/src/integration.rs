//! Cross-crate integration test helpers.
//!
//! Invariant checkers that read a database only through its public API,
//! and a harness that drives random relationship workloads against a model.

use crate::generators::LinkOperation;
use kvorm_codec::Value;
use kvorm_core::{compare_ids, CoreResult, Database, Entity, EntityType};
use std::collections::{BTreeSet, HashMap};

fn linked(value: &Value) -> Vec<String> {
    match value {
        Value::String(id) => vec![id.clone()],
        other => other.as_id_list().unwrap_or_default(),
    }
}

/// Checks that every relationship link has a live partner whose inverse
/// field links back, and that no to-many field holds an id twice.
///
/// # Errors
///
/// Returns a description of the first broken link.
pub fn check_relations(db: &Database) -> Result<(), String> {
    for type_name in db.type_names() {
        let entity_type = db.entity_type(&type_name).map_err(|e| e.to_string())?;
        let schema = entity_type.schema();
        let instances = entity_type.instances().map_err(|e| e.to_string())?;
        for relation in &schema.relations {
            // Misdeclared relationships can never be linked.
            let Ok(target) = db.resolve_type(&relation.target, schema.namespace.as_deref())
            else {
                continue;
            };
            for entity in instances.iter().filter(|e| e.type_name() == type_name) {
                let value = entity.get(&relation.name).map_err(|e| e.to_string())?;
                let ids = linked(&value);
                let unique: BTreeSet<&String> = ids.iter().collect();
                if unique.len() != ids.len() {
                    return Err(format!("{entity}.{} holds duplicates: {value}", relation.name));
                }
                for id in &ids {
                    let partner = target
                        .find(id)
                        .map_err(|e| e.to_string())?
                        .ok_or_else(|| {
                            format!(
                                "{entity}.{} points at missing {}@{id}",
                                relation.name,
                                target.qualified_name()
                            )
                        })?;
                    let back = partner.get(&relation.inverse).map_err(|e| e.to_string())?;
                    if !linked(&back).iter().any(|b| b == entity.id()) {
                        return Err(format!(
                            "{entity}.{} links {partner}, but {partner}.{} is {back}",
                            relation.name, relation.inverse
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks that every type's stored count matches its live instances and
/// that its id counter is at least its highest numeric id.
///
/// # Errors
///
/// Returns a description of the first mismatch.
pub fn check_counters(db: &Database) -> Result<(), String> {
    for type_name in db.type_names() {
        let entity_type = db.entity_type(&type_name).map_err(|e| e.to_string())?;
        let ids: Vec<String> = entity_type
            .instances()
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|e| e.type_name() == type_name)
            .map(|e| e.id().to_string())
            .collect();
        let count = entity_type.count().map_err(|e| e.to_string())?;
        if count != ids.len() as u64 {
            return Err(format!("{type_name}: count is {count}, {} live", ids.len()));
        }
        let max_id = entity_type.max_id().map_err(|e| e.to_string())?;
        if let Some(highest) = ids.iter().filter_map(|id| id.parse::<u64>().ok()).max() {
            if highest > max_id {
                return Err(format!("{type_name}: id {highest} above counter {max_id}"));
            }
        }
    }
    Ok(())
}

/// Checks that audit ids are consecutive and timestamps never go backwards.
///
/// # Errors
///
/// Returns a description of the first gap or reordering.
pub fn check_audit_sequence(db: &Database) -> Result<(), String> {
    let records = db.get_audit(0, u64::MAX).map_err(|e| e.to_string())?;
    let len = db.audit_len().map_err(|e| e.to_string())?;
    if records.len() as u64 != len {
        return Err(format!("audit holds {} records, reports {len}", records.len()));
    }
    for pair in records.windows(2) {
        if pair[1].id.as_u64() != pair[0].id.as_u64() + 1 {
            return Err(format!("audit gap between {} and {}", pair[0].id, pair[1].id));
        }
        if pair[1].timestamp < pair[0].timestamp {
            return Err(format!("audit record {} goes back in time", pair[1].id));
        }
    }
    Ok(())
}

/// Runs every invariant checker, panicking on the first violation.
pub fn assert_invariants(db: &Database) {
    if let Err(message) = check_relations(db)
        .and_then(|()| check_counters(db))
        .and_then(|()| check_audit_sequence(db))
    {
        panic!("invariant violated: {message}");
    }
}

/// Drives [`LinkOperation`]s against a pool of `Person` entities linked
/// through `children`/`mother`, tracking the expected links in a model.
pub struct FamilyHarness<'db> {
    people: EntityType<'db>,
    pool: Vec<Entity<'db>>,
    mothers: HashMap<String, String>,
}

impl<'db> FamilyHarness<'db> {
    /// Creates `size` people of the `people` type.
    ///
    /// The type must declare `children` as one-to-many and `mother` as its
    /// many-to-one inverse, as [`crate::scenarios::person_schema`] does.
    pub fn new(people: EntityType<'db>, size: usize) -> CoreResult<Self> {
        let pool = (0..size)
            .map(|i| people.create([("name", Value::from(format!("member_{i}")))]))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            people,
            pool,
            mothers: HashMap::new(),
        })
    }

    /// Applies one operation to the database and the model.
    pub fn apply(&mut self, op: &LinkOperation) -> CoreResult<()> {
        if self.pool.is_empty() {
            return Ok(());
        }
        let n = self.pool.len();
        match *op {
            LinkOperation::Link { from, to } => {
                let (mother, child) = (&self.pool[from % n], &self.pool[to % n]);
                mother.add_ref("children", child)?;
                self.mothers
                    .insert(child.id().to_string(), mother.id().to_string());
            }
            LinkOperation::Unlink { from, to } => {
                let (mother, child) = (&self.pool[from % n], &self.pool[to % n]);
                mother.remove_ref("children", child)?;
                if self.mothers.get(child.id()).map(String::as_str) == Some(mother.id()) {
                    self.mothers.remove(child.id());
                }
            }
            LinkOperation::Clear { from } => {
                let mother = &self.pool[from % n];
                mother.set_ref_ids::<&str>("children", &[])?;
                self.mothers.retain(|_, m| m.as_str() != mother.id());
            }
            LinkOperation::Delete { index } => {
                let gone = self.pool.remove(index % n);
                gone.delete()?;
                self.mothers
                    .retain(|child, m| m.as_str() != gone.id() && child.as_str() != gone.id());
            }
        }
        Ok(())
    }

    /// Compares every pool member's `mother` and `children` with the model.
    ///
    /// # Errors
    ///
    /// Returns a description of the first difference.
    pub fn verify(&self) -> Result<(), String> {
        for person in &self.pool {
            let mother = person
                .get_ref("mother")
                .map_err(|e| e.to_string())?
                .map(|m| m.id().to_string());
            let expected = self.mothers.get(person.id()).cloned();
            if mother != expected {
                return Err(format!("{person}.mother is {mother:?}, expected {expected:?}"));
            }

            let mut children: Vec<String> = person
                .get_refs("children")
                .map_err(|e| e.to_string())?
                .iter()
                .map(|c| c.id().to_string())
                .collect();
            children.sort_by(|a, b| compare_ids(a, b));
            let mut expected: Vec<String> = self
                .mothers
                .iter()
                .filter(|(_, m)| *m == person.id())
                .map(|(child, _)| child.clone())
                .collect();
            expected.sort_by(|a, b| compare_ids(a, b));
            if children != expected {
                return Err(format!(
                    "{person}.children is {children:?}, expected {expected:?}"
                ));
            }
        }
        Ok(())
    }

    /// Returns the live pool.
    pub fn pool(&self) -> &[Entity<'db>] {
        &self.pool
    }

    /// Returns the entity type the pool belongs to.
    pub fn people(&self) -> &EntityType<'db> {
        &self.people
    }
}

/// Drives [`LinkOperation`]s against a pool of `Partner` entities married
/// through the one-to-one `spouse` field, tracking the expected pairs.
pub struct CoupleHarness<'db> {
    partners: EntityType<'db>,
    pool: Vec<Entity<'db>>,
    spouses: HashMap<String, String>,
}

impl<'db> CoupleHarness<'db> {
    /// Creates `size` partners of the `partners` type, which must declare
    /// `spouse` as one-to-one with itself as inverse, as
    /// [`crate::scenarios::couple_schema`] does.
    pub fn new(partners: EntityType<'db>, size: usize) -> CoreResult<Self> {
        let pool = (0..size)
            .map(|i| partners.create([("name", Value::from(format!("partner_{i}")))]))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self {
            partners,
            pool,
            spouses: HashMap::new(),
        })
    }

    /// Applies one operation to the database and the model.
    pub fn apply(&mut self, op: &LinkOperation) -> CoreResult<()> {
        if self.pool.is_empty() {
            return Ok(());
        }
        let n = self.pool.len();
        match *op {
            LinkOperation::Link { from, to } => {
                let (a, b) = (self.pool[from % n].clone(), self.pool[to % n].clone());
                a.set_ref("spouse", Some(&b))?;
                if self.spouses.get(a.id()).map(String::as_str) != Some(b.id()) {
                    self.release(a.id());
                    self.release(b.id());
                    self.spouses.insert(a.id().to_string(), b.id().to_string());
                    self.spouses.insert(b.id().to_string(), a.id().to_string());
                }
            }
            LinkOperation::Unlink { from, to } => {
                let (a, b) = (self.pool[from % n].clone(), self.pool[to % n].clone());
                if self.spouses.get(a.id()).map(String::as_str) == Some(b.id()) {
                    a.set_ref("spouse", None)?;
                    self.release(a.id());
                }
            }
            LinkOperation::Clear { from } => {
                let a = self.pool[from % n].clone();
                a.set_ref_id("spouse", None)?;
                self.release(a.id());
            }
            LinkOperation::Delete { index } => {
                let gone = self.pool.remove(index % n);
                gone.delete()?;
                self.release(gone.id());
            }
        }
        Ok(())
    }

    // Drops `id`'s pair from the model, on both sides.
    fn release(&mut self, id: &str) {
        if let Some(partner) = self.spouses.remove(id) {
            if self.spouses.get(&partner).map(String::as_str) == Some(id) {
                self.spouses.remove(&partner);
            }
        }
    }

    /// Compares every pool member's `spouse` with the model.
    ///
    /// # Errors
    ///
    /// Returns a description of the first difference.
    pub fn verify(&self) -> Result<(), String> {
        for person in &self.pool {
            let spouse = person
                .get_ref("spouse")
                .map_err(|e| e.to_string())?
                .map(|s| s.id().to_string());
            let expected = self.spouses.get(person.id()).cloned();
            if spouse != expected {
                return Err(format!("{person}.spouse is {spouse:?}, expected {expected:?}"));
            }
        }
        Ok(())
    }

    /// Returns the live pool.
    pub fn pool(&self) -> &[Entity<'db>] {
        &self.pool
    }

    /// Returns the entity type the pool belongs to.
    pub fn partners(&self) -> &EntityType<'db> {
        &self.partners
    }
}

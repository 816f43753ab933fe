//! Relationship descriptors and record-level link bookkeeping.
//!
//! Relationships are never stored on their own. Each side keeps the ids of
//! its partners in its own record: a to-one field holds a single id string
//! (or `null`), a to-many field holds an ordered list of id strings.

use kvorm_codec::{Record, Value};

/// Cardinality of a relationship, seen from the declaring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Each side holds at most one partner.
    OneToOne,
    /// This side holds many; each partner holds this one.
    OneToMany,
    /// This side holds one; the partner holds many.
    ManyToOne,
    /// Both sides hold many.
    ManyToMany,
}

impl RelationKind {
    /// Returns true if this side stores an id list.
    pub const fn is_to_many(self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// Returns the kind the inverse field must declare.
    pub const fn inverse(self) -> Self {
        match self {
            RelationKind::OneToOne => RelationKind::OneToOne,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        }
    }

    /// Returns the value an unlinked field holds.
    pub fn empty_value(self) -> Value {
        if self.is_to_many() {
            Value::List(Vec::new())
        } else {
            Value::Null
        }
    }

    /// Returns a readable name for error messages.
    pub const fn name(self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

/// A declared relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    /// Field name in the record.
    pub name: String,
    /// Cardinality from this side.
    pub kind: RelationKind,
    /// Target type name, bare or `ns::` qualified.
    pub target: String,
    /// Field on the target type that mirrors this one.
    pub inverse: String,
}

impl RelationDef {
    /// Declares a relationship field.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            inverse: inverse.into(),
        }
    }

    /// Declares a one-to-one field.
    #[must_use]
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::OneToOne, target, inverse)
    }

    /// Declares the "one" side of a one-to-many relationship.
    #[must_use]
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::OneToMany, target, inverse)
    }

    /// Declares the "many" side of a one-to-many relationship.
    #[must_use]
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::ManyToOne, target, inverse)
    }

    /// Declares a many-to-many field.
    #[must_use]
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::ManyToMany, target, inverse)
    }
}

/// Returns the ids held by a relationship field, in order.
pub(crate) fn linked_ids(record: &Record, kind: RelationKind, field: &str) -> Vec<String> {
    match record.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) if kind.is_to_many() => value.as_id_list().unwrap_or_default(),
        Some(value) => value.as_str().map(|id| vec![id.to_string()]).unwrap_or_default(),
    }
}

/// Links `id` into `field`: replaces a to-one value, appends to a to-many list
/// unless already present. Returns true if the record changed.
pub(crate) fn attach(record: &mut Record, kind: RelationKind, field: &str, id: &str) -> bool {
    if kind.is_to_many() {
        let mut ids = linked_ids(record, kind, field);
        if ids.iter().any(|existing| existing == id) {
            return false;
        }
        ids.push(id.to_string());
        record.set(field, Value::id_list(ids));
        true
    } else {
        let value = Value::from(id);
        if record.get(field) == Some(&value) {
            return false;
        }
        record.set(field, value);
        true
    }
}

/// Unlinks `id` from `field`. A to-one field is only cleared if it still
/// points at `id`. Returns true if the record changed.
pub(crate) fn detach(record: &mut Record, kind: RelationKind, field: &str, id: &str) -> bool {
    if kind.is_to_many() {
        let ids = linked_ids(record, kind, field);
        let before = ids.len();
        let kept: Vec<String> = ids.into_iter().filter(|existing| existing != id).collect();
        if kept.len() == before {
            return false;
        }
        record.set(field, Value::id_list(kept));
        true
    } else {
        if record.get(field).and_then(Value::as_str) != Some(id) {
            return false;
        }
        record.set(field, Value::Null);
        true
    }
}

//! Core type definitions for kvorm.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::fmt;

/// Separator between a namespace and a type name.
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Separator between a type name and an id in storage keys.
pub const KEY_SEPARATOR: char = '@';

/// Builds the qualified name `namespace::Name`, or `Name` in the root namespace.
#[must_use]
pub fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}{NAMESPACE_SEPARATOR}{name}"),
        None => name.to_string(),
    }
}

/// Splits a qualified name into its namespace and bare name.
#[must_use]
pub fn split_qualified(qualified: &str) -> (Option<&str>, &str) {
    match qualified.rsplit_once(NAMESPACE_SEPARATOR) {
        Some((ns, name)) => (Some(ns), name),
        None => (None, qualified),
    }
}

/// Checks that a bare type name can be used in storage keys.
pub(crate) fn validate_type_name(name: &str) -> CoreResult<()> {
    let reason = if name.is_empty() {
        Some("type name must not be empty")
    } else if name.contains(KEY_SEPARATOR) {
        Some("type name must not contain '@'")
    } else if name.contains(NAMESPACE_SEPARATOR) {
        Some("type name must not contain '::'; use a namespace")
    } else if name.starts_with('_') {
        Some("type names starting with '_' are reserved")
    } else if name.ends_with("_alias") {
        Some("type names ending in '_alias' collide with alias keys")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::invalid_operation(format!("{name:?}: {reason}"))),
        None => Ok(()),
    }
}

/// Checks that a namespace can be used in storage keys.
pub(crate) fn validate_namespace(namespace: &str) -> CoreResult<()> {
    if namespace.is_empty() || namespace.contains(KEY_SEPARATOR) {
        return Err(CoreError::invalid_operation(format!(
            "invalid namespace {namespace:?}"
        )));
    }
    Ok(())
}

/// Orders entity ids: numeric ids first by value, then other ids lexically.
#[must_use]
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Storage identity of an entity: qualified type name plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// Qualified type name.
    pub type_name: String,
    /// Entity id within the type.
    pub id: String,
}

impl EntityKey {
    /// Creates a new entity key.
    #[must_use]
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    /// Parses a `Type@id` storage key.
    ///
    /// Type names and namespaces never contain `@`, so the first one splits.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (type_name, id) = key.split_once(KEY_SEPARATOR)?;
        if type_name.is_empty() {
            return None;
        }
        Some(Self::new(type_name, id))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.type_name, self.id)
    }
}

/// Sequence number of an audit record.
///
/// Audit ids are global across all types, start at zero and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuditId(pub u64);

impl AuditId {
    /// Creates a new audit id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next audit id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Mutation hooks.
//!
//! A type may carry one [`EntityHook`]. It sees every create, field write and
//! delete of that type's entities before anything is persisted, and can
//! accept the proposed value, substitute another, or reject the mutation.

use crate::entity::Entity;
use kvorm_codec::{Record, Value};
use std::fmt;

/// Kind of mutation a hook is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A new entity is being created.
    Create,
    /// A field of an existing entity is being written.
    Modify,
    /// An entity is being deleted.
    Delete,
}

impl Action {
    /// Returns the name used in audit records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed mutation, as shown to a hook.
///
/// For relationship fields the values are ids: a string or `null` for to-one
/// fields, an id list for to-many fields.
#[derive(Debug)]
pub struct HookEvent<'a> {
    /// The subject entity.
    pub entity: &'a Entity<'a>,
    /// The subject's record before the mutation. During create this is the
    /// record being assembled, which is not yet stored.
    pub record: &'a Record,
    /// Field being written. `None` for entity-level create and delete.
    pub field: Option<&'a str>,
    /// Current value of the field.
    pub old_value: &'a Value,
    /// Proposed value of the field.
    pub new_value: &'a Value,
    /// Kind of mutation.
    pub action: Action,
}

impl HookEvent<'_> {
    /// Accepts the proposed value unchanged.
    pub fn allow(&self) -> HookDecision {
        HookDecision::Accept(self.new_value.clone())
    }

    /// Returns the caller id on the current thread.
    pub fn caller(&self) -> String {
        self.entity.database().get_caller_id()
    }

    /// Returns true if this event writes `field`.
    pub fn is_field(&self, field: &str) -> bool {
        self.field == Some(field)
    }
}

/// A hook's verdict on a proposed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// Proceed, storing this value (which may differ from the proposal).
    Accept(Value),
    /// Abort the mutation. Surfaces as [`crate::CoreError::PermissionDenied`].
    Reject,
}

impl HookDecision {
    /// Builds a decision from an allow flag and a value.
    pub fn from_bool(allow: bool, value: impl Into<Value>) -> Self {
        if allow {
            HookDecision::Accept(value.into())
        } else {
            HookDecision::Reject
        }
    }
}

/// Intercepts mutations of one entity type.
///
/// Hooks run without any database lock held and may read other entities.
/// They should not mutate the subject entity themselves.
pub trait EntityHook: Send + Sync {
    /// Decides on a proposed mutation.
    fn on_event(&self, event: &HookEvent<'_>) -> HookDecision;
}

impl<F> EntityHook for F
where
    F: Fn(&HookEvent<'_>) -> HookDecision + Send + Sync,
{
    fn on_event(&self, event: &HookEvent<'_>) -> HookDecision {
        self(event)
    }
}

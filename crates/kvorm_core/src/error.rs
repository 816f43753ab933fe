//! Error types for kvorm core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kvorm core operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Key-value store error.
    #[error("storage error: {0}")]
    Storage(#[from] kvorm_storage::StorageError),

    /// JSON codec error.
    #[error("codec error: {0}")]
    Codec(#[from] kvorm_codec::CodecError),

    /// A property constraint was violated.
    #[error("invalid value {value} for field '{field}': {constraint}")]
    Validation {
        /// Field being written.
        field: String,
        /// Offending value, rendered as JSON.
        value: String,
        /// The violated constraint.
        constraint: String,
    },

    /// A type name could not be resolved, or resolved ambiguously.
    #[error("type resolution failed: {message}")]
    Resolution {
        /// Description of the resolution failure.
        message: String,
    },

    /// A hook rejected the mutation.
    #[error("hook rejected {action} of {key}{}", .field.as_ref().map(|f| format!(" (field '{f}')")).unwrap_or_default())]
    PermissionDenied {
        /// Storage key of the subject entity.
        key: String,
        /// Field being written, if any.
        field: Option<String>,
        /// Action that was rejected.
        action: String,
    },

    /// The entity was deleted; the handle is no longer usable.
    #[error("entity {key} has been deleted")]
    StaleEntity {
        /// Storage key of the deleted entity.
        key: String,
    },

    /// No entity matched an id or alias lookup.
    #[error("entity not found: {key}")]
    NotFound {
        /// The key or alias that was looked up.
        key: String,
    },

    /// An explicit id is already taken.
    #[error("entity {key} already exists")]
    DuplicateEntity {
        /// Storage key of the existing entity.
        key: String,
    },

    /// An internal invariant was violated. Not user-recoverable.
    #[error("consistency violation: {message}")]
    Consistency {
        /// Description of the violated invariant.
        message: String,
    },

    /// Operation not permitted for this field, type or argument.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(
        field: impl Into<String>,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    /// Creates a resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(
        key: impl Into<String>,
        field: Option<&str>,
        action: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            key: key.into(),
            field: field.map(str::to_string),
            action: action.into(),
        }
    }

    /// Creates a stale entity error.
    pub fn stale(key: impl Into<String>) -> Self {
        Self::StaleEntity { key: key.into() }
    }

    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a duplicate entity error.
    pub fn duplicate(key: impl Into<String>) -> Self {
        Self::DuplicateEntity { key: key.into() }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error came from a hook rejection.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Attempted to remove a key that is not stored.
    #[error("key not found in storage: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// The host store rejected or failed an operation.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// The store is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a backend failure error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

//! Store error types.

use thiserror::Error;

use crate::model::ResourceKind;

/// Errors returned by [`Store`](super::Store) implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: ResourceKind,
        /// Namespace of the missing object.
        namespace: String,
        /// Name of the missing object.
        name: String,
    },

    /// An object with the same kind, namespace and name already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Kind of the existing object.
        kind: ResourceKind,
        /// Namespace of the existing object.
        namespace: String,
        /// Name of the existing object.
        name: String,
    },

    /// The object changed since it was read.
    #[error(
        "conflict updating {kind} {namespace}/{name}: expected resource version {expected}, found {actual}"
    )]
    Conflict {
        /// Kind of the object.
        kind: ResourceKind,
        /// Namespace of the object.
        namespace: String,
        /// Name of the object.
        name: String,
        /// Resource version carried by the update.
        expected: u64,
        /// Resource version currently stored.
        actual: u64,
    },

    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Object body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The object is malformed (empty name, unknown kind in the log, ...).
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Returns `true` for [`StoreError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`StoreError::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

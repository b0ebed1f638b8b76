//! Versioning handler error types.

use thiserror::Error;

use crate::model::ParseRefError;
use crate::store::StoreError;

/// Errors returned by the versioning handlers.
///
/// Every variant is retryable: the dispatcher re-invokes the handler later.
/// Conditions that never heal (a version whose template never appears) keep
/// failing until someone corrects or deletes the offending object.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    /// Store read or write failed (including optimistic-concurrency loss).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A template version has not completed number assignment yet.
    #[error(
        "template version {namespace}/{name} of template {template} has not been assigned a version number"
    )]
    VersionNotAssigned {
        /// Namespace of the version.
        namespace: String,
        /// Name of the version.
        name: String,
        /// Name of the owning template.
        template: String,
    },

    /// `defaultVersionId` could not be parsed.
    #[error("invalid default version reference: {0}")]
    InvalidReference(#[from] ParseRefError),

    /// `defaultVersionId` names a version that belongs to another template.
    #[error("default version {reference} belongs to template {owner}, not {template}")]
    ForeignDefaultVersion {
        /// The offending reference.
        reference: String,
        /// Template that owns the referenced version.
        owner: String,
        /// Template that carries the reference.
        template: String,
    },
}

impl ControllerError {
    /// Returns `true` if the error is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Returns `true` if a referenced object does not exist (yet).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

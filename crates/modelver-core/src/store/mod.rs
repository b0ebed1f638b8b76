//! Persistent object store with optimistic concurrency and a change log.
//!
//! The store is the system of record. Every write goes through a single
//! transaction that appends one row to the change log; the row's revision
//! becomes the object's new `resource_version`. Readers that want to follow
//! the store tail the change log by revision cursor.
//!
//! # Contract
//!
//! - `get` fails with [`StoreError::NotFound`] for absent objects.
//! - `list` returns objects ordered by `creation_revision`, so "first" is
//!   well defined and stable.
//! - `update` fails with [`StoreError::Conflict`] if the object changed since
//!   it was read (its `resource_version` no longer matches).
//! - `delete` of an object that still has finalizers only sets its
//!   `deletion_timestamp`; the object is removed by the update that clears
//!   the last finalizer. Removing an object also removes the objects whose
//!   owner references name its uid.
//!
//! # Example
//!
//! ```rust,no_run
//! use modelver_core::model::{ModelTemplate, ModelTemplateVersion};
//! use modelver_core::store::{LabelSelector, SqliteStore, Store};
//!
//! # fn example() -> Result<(), modelver_core::store::StoreError> {
//! let store = SqliteStore::open("/var/lib/modelver/store.db")?;
//! let template = store.create(&ModelTemplate::new("default", "llama"))?;
//! store.create(&ModelTemplateVersion::new("default", "llama-v1", "llama"))?;
//!
//! let versions: Vec<ModelTemplateVersion> =
//!     store.list(Some("default"), &LabelSelector::everything())?;
//! # let _ = (template, versions);
//! # Ok(())
//! # }
//! ```

mod error;
mod selector;
mod sqlite;

#[cfg(test)]
mod tests;

pub use error::{StoreError, StoreResult};
pub use selector::{LabelSelector, ParseSelectorError};
pub use sqlite::SqliteStore;

use crate::model::{Resource, ResourceKind};

/// Kind of change recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The object was created or updated (including deletion marking).
    Applied,
    /// The object was removed from the store.
    Deleted,
}

impl ChangeType {
    /// Returns the persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a persisted name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "applied" => Some(Self::Applied),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One entry of the store's change log.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Monotonic revision of this change.
    pub revision: u64,
    /// Kind of the changed object.
    pub kind: ResourceKind,
    /// Namespace of the changed object.
    pub namespace: String,
    /// Name of the changed object.
    pub name: String,
    /// What happened.
    pub change_type: ChangeType,
    /// Last object body for [`ChangeType::Deleted`] entries.
    pub object: Option<serde_json::Value>,
}

impl Change {
    /// Decodes the tombstone body of a deleted object.
    ///
    /// Returns `None` for applied changes or when the body belongs to a
    /// different kind.
    #[must_use]
    pub fn tombstone<R: Resource>(&self) -> Option<R> {
        if self.kind != R::KIND {
            return None;
        }
        self.object
            .as_ref()
            .and_then(|body| serde_json::from_value(body.clone()).ok())
    }
}

/// Object store consumed by the versioning core and the dispatcher.
///
/// Calls block the caller until the underlying storage answers. There is no
/// retry or timeout layered on top; callers that run on an async runtime are
/// expected to move store calls onto a blocking thread.
pub trait Store: Send + Sync + 'static {
    /// Reads one object.
    fn get<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<R>;

    /// Lists objects of one kind, optionally restricted to a namespace,
    /// ordered by `creation_revision`.
    fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<R>>;

    /// Creates an object. Store-owned metadata is assigned here.
    fn create<R: Resource>(&self, object: &R) -> StoreResult<R>;

    /// Replaces an object if its `resource_version` is still current.
    fn update<R: Resource>(&self, object: &R) -> StoreResult<R>;

    /// Requests removal of an object.
    fn delete<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<()>;

    /// Returns up to `limit` change log entries with revision > `revision`.
    fn changes_since(&self, revision: u64, limit: usize) -> StoreResult<Vec<Change>>;

    /// Returns the highest revision ever allocated (0 for an empty store).
    fn head_revision(&self) -> StoreResult<u64>;

    /// Drops change log entries with revision <= `up_to`. Returns how many
    /// entries were removed.
    fn compact_changes(&self, up_to: u64) -> StoreResult<u64>;
}

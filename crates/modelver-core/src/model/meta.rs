//! Object metadata shared by every resource kind.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata carried by every stored object.
///
/// `uid`, `resource_version`, `creation_revision` and `creation_timestamp`
/// are assigned by the store; values set by callers on create are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within the namespace and kind.
    pub name: String,

    /// Namespace the object lives in.
    #[serde(default)]
    pub namespace: String,

    /// Store-assigned unique identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Optimistic-concurrency token. Updates must carry the value they read.
    #[serde(default)]
    pub resource_version: u64,

    /// Store-assigned creation sequence, strictly increasing across all
    /// objects and immutable after create.
    #[serde(default)]
    pub creation_revision: u64,

    /// Wall-clock creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set when removal was requested but finalizers still hold the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Key/value labels used for indexed lookup.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Owners of this object, consulted by the store's garbage collector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Finalizers that must be cleared before a deletion-marked object is
    /// removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    /// Creates metadata for a new object.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if an owner reference with the given uid is present.
    #[must_use]
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }

    /// Returns the controlling owner reference, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Structured "owned-by" relation stored on a dependent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner (same namespace as the dependent).
    pub name: String,
    /// Uid of the owner.
    pub uid: String,
    /// Owner removal waits for this dependent to be collected.
    #[serde(default)]
    pub block_owner_deletion: bool,
    /// This owner is the managing controller of the dependent.
    #[serde(default)]
    pub controller: bool,
}

/// Error returned when a `namespace/name` reference cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object reference '{0}': expected 'namespace/name'")]
pub struct ParseRefError(pub String);

/// A `namespace/name` object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Namespace part.
    pub namespace: String,
    /// Name part.
    pub name: String,
}

impl ObjectRef {
    /// Builds a reference from its parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `namespace/name`. A bare `name` resolves to the empty
    /// namespace.
    pub fn parse(value: &str) -> Result<Self, ParseRefError> {
        let (namespace, name) = match value.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("", value),
        };
        if name.is_empty() || name.contains('/') {
            return Err(ParseRefError(value.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

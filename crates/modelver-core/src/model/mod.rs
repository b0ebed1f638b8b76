//! Resource data model for templates and template versions.
//!
//! Two resource kinds are managed:
//!
//! ```text
//! ModelTemplate (parent)
//!     |  spec.defaultVersionId  --> "namespace/name" of one version
//!     |  status.defaultVersion  --> mirrors that version's number
//!     |  status.latestVersion   --> mirrors the in-memory high-water mark
//!     |
//!     +-- ModelTemplateVersion (child, many)
//!             spec.templateName     --> owning template (by name)
//!             status.version        --> assigned once, never reassigned
//!             status.conditions     --> "assigned" condition
//!             metadata.labels       --> modelver.io/template-name
//!             metadata.ownerReferences --> controlling owner = template
//! ```
//!
//! Both kinds share [`ObjectMeta`], which carries the store-assigned
//! optimistic-concurrency token (`resource_version`) and the immutable
//! creation sequence (`creation_revision`) used to decide which version of a
//! template came first.

mod condition;
mod meta;
mod template;
mod version;

pub use condition::{Condition, ConditionStatus, ConditionType, VERSION_ASSIGNED};
pub use meta::{ObjectMeta, ObjectRef, OwnerReference, ParseRefError};
pub use template::{ModelTemplate, ModelTemplateSpec, ModelTemplateStatus};
pub use version::{
    AutoScalingConfig, DeploymentConfig, EngineConfig, EngineKwargs, Generation,
    InferenceEngineType, ModelTemplateVersion, ModelTemplateVersionSpec,
    ModelTemplateVersionStatus, PlacementStrategy, PromptFormat, RayActorOptions, ScalingConfig,
};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// API group/version stamped on every resource and owner reference.
pub const API_VERSION: &str = "modelver.io/v1";

/// Label linking a template version back to its template, used for indexed
/// lookups of a template's versions.
pub const LABEL_TEMPLATE_NAME: &str = "modelver.io/template-name";

/// The resource kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// A [`ModelTemplate`].
    ModelTemplate,
    /// A [`ModelTemplateVersion`].
    ModelTemplateVersion,
}

impl ResourceKind {
    /// All kinds, in dependency order (owners first).
    pub const ALL: [Self; 2] = [Self::ModelTemplate, Self::ModelTemplateVersion];

    /// Returns the kind name as persisted and reported in owner references.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelTemplate => "ModelTemplate",
            Self::ModelTemplateVersion => "ModelTemplateVersion",
        }
    }

    /// Parses a persisted kind name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ModelTemplate" => Some(Self::ModelTemplate),
            "ModelTemplateVersion" => Some(Self::ModelTemplateVersion),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted resource kind.
///
/// Implementors are plain data; the store owns identity, revisions and
/// timestamps inside [`ObjectMeta`].
pub trait Resource:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind discriminant used by the store and the dispatcher.
    const KIND: ResourceKind;

    /// Returns the object metadata.
    fn metadata(&self) -> &ObjectMeta;

    /// Returns the object metadata mutably.
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Returns the `namespace/name` key of this object.
    fn object_ref(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(&meta.namespace, &meta.name)
    }

    /// Returns `true` once removal of this object has been requested.
    fn is_deleting(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }
}

impl Resource for ModelTemplate {
    const KIND: ResourceKind = ResourceKind::ModelTemplate;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for ModelTemplateVersion {
    const KIND: ResourceKind = ResourceKind::ModelTemplateVersion;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

//! The `ModelTemplate` resource.

use serde::{Deserialize, Serialize};

use super::meta::{ObjectMeta, ObjectRef};

/// A model template: the parent of many immutable, numbered versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplate {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: ModelTemplateSpec,
    /// Observed state maintained by the template controller.
    #[serde(default)]
    pub status: ModelTemplateStatus,
}

/// Desired state of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateSpec {
    /// Free-form description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// `namespace/name` of the default version. Empty until bound; once
    /// bound the controller only re-validates it.
    #[serde(default, rename = "defaultVersionId")]
    pub default_version_id: String,
}

/// Observed state of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTemplateStatus {
    /// Version number of the default version.
    #[serde(default)]
    pub default_version: u64,
    /// Highest version number assigned so far, as known by the controller.
    #[serde(default)]
    pub latest_version: u64,
}

impl ModelTemplate {
    /// Creates an empty template.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
    }

    /// Sets the description (builder style).
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = description.into();
        self
    }

    /// Pins the default version (builder style).
    #[must_use]
    pub fn with_default_version(mut self, version: &ObjectRef) -> Self {
        self.spec.default_version_id = version.to_string();
        self
    }
}

//! Keeps template status in line with its versions and the cache.

use std::sync::Arc;

use tracing::debug;

use super::{ControllerError, VersionCache};
use crate::model::{
    LABEL_TEMPLATE_NAME, ModelTemplate, ModelTemplateVersion, ObjectRef, Resource,
    VERSION_ASSIGNED,
};
use crate::store::{LabelSelector, Store};

/// Change and remove handlers for templates.
///
/// Cache reads go through the template's slot lock. While a version of the
/// same template is being numbered, [`sync_latest_version`] waits for that
/// version's store write to finish, so it never publishes a number that is
/// not yet durable.
///
/// [`sync_latest_version`]: Self::sync_latest_version
pub struct TemplateSynchronizer<S> {
    store: Arc<S>,
    cache: Arc<VersionCache>,
}

fn ensure_assigned(
    template: &ModelTemplate,
    version: &ModelTemplateVersion,
) -> Result<(), ControllerError> {
    if VERSION_ASSIGNED.is_true(&version.status.conditions) {
        return Ok(());
    }
    Err(ControllerError::VersionNotAssigned {
        namespace: version.metadata.namespace.clone(),
        name: version.metadata.name.clone(),
        template: template.object_ref().to_string(),
    })
}

impl<S: Store> TemplateSynchronizer<S> {
    /// Creates a synchronizer over `store` and the shared cache.
    pub const fn new(store: Arc<S>, cache: Arc<VersionCache>) -> Self {
        Self { store, cache }
    }

    /// Binds an unset default version to the first version of the template,
    /// or refreshes `status.defaultVersion` from the bound one.
    ///
    /// The first version is the labelled one with the smallest creation
    /// revision. Binding waits (retryable error) until it is assigned.
    pub fn set_default_version(
        &self,
        _key: &str,
        template: Option<&ModelTemplate>,
    ) -> Result<Option<ModelTemplate>, ControllerError> {
        let Some(template) = template else {
            return Ok(None);
        };
        if template.is_deleting() {
            return Ok(Some(template.clone()));
        }

        if template.spec.default_version_id.is_empty() {
            let Some(first) = self.first_version(template)? else {
                return Ok(Some(template.clone()));
            };
            ensure_assigned(template, &first)?;

            let mut copy = template.clone();
            copy.spec.default_version_id = first.object_ref().to_string();
            copy.status.default_version = first.status.version;
            let updated = self.store.update(&copy)?;
            debug!(
                template = %template.object_ref(),
                default = %updated.spec.default_version_id,
                "bound default version"
            );
            return Ok(Some(updated));
        }

        let mut reference = ObjectRef::parse(&template.spec.default_version_id)?;
        if reference.namespace.is_empty() {
            reference.namespace.clone_from(&template.metadata.namespace);
        }
        let version: ModelTemplateVersion = self.store.get(&reference.namespace, &reference.name)?;
        if version.metadata.namespace != template.metadata.namespace
            || version.spec.template_name != template.metadata.name
        {
            return Err(ControllerError::ForeignDefaultVersion {
                reference: template.spec.default_version_id.clone(),
                owner: format!(
                    "{}/{}",
                    version.metadata.namespace, version.spec.template_name
                ),
                template: template.object_ref().to_string(),
            });
        }
        ensure_assigned(template, &version)?;
        if version.status.version == template.status.default_version {
            return Ok(Some(template.clone()));
        }

        let mut copy = template.clone();
        copy.status.default_version = version.status.version;
        Ok(Some(self.store.update(&copy)?))
    }

    /// Copies the cached high-water mark into `status.latestVersion`.
    ///
    /// Only counts numbers assigned under this template's uid. May block
    /// behind an in-flight assignment for the same template.
    pub fn sync_latest_version(
        &self,
        _key: &str,
        template: Option<&ModelTemplate>,
    ) -> Result<Option<ModelTemplate>, ControllerError> {
        let Some(template) = template else {
            return Ok(None);
        };
        if template.is_deleting() {
            return Ok(Some(template.clone()));
        }

        let latest = self
            .cache
            .latest_for(&template.object_ref(), &template.metadata.uid);
        if template.status.latest_version == latest {
            return Ok(Some(template.clone()));
        }

        let mut copy = template.clone();
        copy.status.latest_version = latest;
        let updated = self.store.update(&copy)?;
        debug!(template = %template.object_ref(), latest, "synced latest version");
        Ok(Some(updated))
    }

    /// Drops the template's cache entry. Never fails.
    ///
    /// An entry already claimed by a newer template of the same name is
    /// kept.
    pub fn delete_latest_version(
        &self,
        _key: &str,
        template: Option<&ModelTemplate>,
    ) -> Result<Option<ModelTemplate>, ControllerError> {
        let Some(template) = template else {
            return Ok(None);
        };
        let key = template.object_ref();
        if self.cache.delete_owned(&key, &template.metadata.uid) {
            debug!(template = %key, "dropped latest version record");
        } else {
            debug!(template = %key, uid = %template.metadata.uid, "no latest version record to drop");
        }
        Ok(Some(template.clone()))
    }

    fn first_version(
        &self,
        template: &ModelTemplate,
    ) -> Result<Option<ModelTemplateVersion>, ControllerError> {
        let selector = LabelSelector::everything().with(LABEL_TEMPLATE_NAME, &template.metadata.name);
        let versions: Vec<ModelTemplateVersion> =
            self.store.list(Some(&template.metadata.namespace), &selector)?;
        Ok(versions
            .into_iter()
            .min_by_key(|v| v.metadata.creation_revision))
    }
}

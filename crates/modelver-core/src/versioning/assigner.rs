//! Assigns version numbers to new template versions.

use std::sync::Arc;

use tracing::{debug, info};

use super::{ControllerError, Enqueuer, VersionCache};
use crate::model::{
    API_VERSION, ConditionStatus, LABEL_TEMPLATE_NAME, ModelTemplate, ModelTemplateVersion,
    OwnerReference, Resource, ResourceKind, VERSION_ASSIGNED,
};
use crate::store::Store;

/// Condition reason recorded while the owning template cannot be found.
pub const REASON_TEMPLATE_NOT_FOUND: &str = "TemplateNotFound";

/// Change handler for template versions.
pub struct VersionAssigner<S> {
    store: Arc<S>,
    cache: Arc<VersionCache>,
    enqueuer: Arc<dyn Enqueuer>,
}

impl<S: Store> VersionAssigner<S> {
    /// Creates an assigner. `enqueuer` re-triggers the owning template.
    pub fn new(store: Arc<S>, cache: Arc<VersionCache>, enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self {
            store,
            cache,
            enqueuer,
        }
    }

    /// Gives `version` the next number of its template, exactly once.
    ///
    /// Returns the input unchanged when there is nothing to do (absent,
    /// deleting, already assigned, or the template itself is being
    /// deleted). The number is reserved and written
    /// under the template's cache slot, so concurrent calls for sibling
    /// versions receive distinct consecutive numbers. A lost write
    /// (conflict, store failure) leaves the counter untouched and the error
    /// is returned for the dispatcher to retry.
    pub fn assign_version(
        &self,
        _key: &str,
        version: Option<&ModelTemplateVersion>,
    ) -> Result<Option<ModelTemplateVersion>, ControllerError> {
        let Some(version) = version else {
            return Ok(None);
        };
        if version.is_deleting() || VERSION_ASSIGNED.is_true(&version.status.conditions) {
            return Ok(Some(version.clone()));
        }

        let namespace = &version.metadata.namespace;
        let template_name = &version.spec.template_name;
        let template: ModelTemplate = match self.store.get(namespace, template_name) {
            Ok(template) => template,
            Err(e) if e.is_not_found() => {
                self.record_missing_template(version)?;
                return Err(e.into());
            },
            Err(e) => return Err(e.into()),
        };
        if template.is_deleting() {
            // Its counter may already be gone; numbering now could reuse 1.
            debug!(
                template = %template.object_ref(),
                version = %version.object_ref(),
                "template is being deleted, version left unassigned"
            );
            return Ok(Some(version.clone()));
        }

        let mut candidate = version.clone();
        candidate
            .metadata
            .labels
            .insert(LABEL_TEMPLATE_NAME.to_string(), template.metadata.name.clone());
        if !candidate.metadata.is_owned_by(&template.metadata.uid) {
            candidate.metadata.owner_references.push(OwnerReference {
                api_version: API_VERSION.to_string(),
                kind: ResourceKind::ModelTemplate.as_str().to_string(),
                name: template.metadata.name.clone(),
                uid: template.metadata.uid.clone(),
                block_owner_deletion: true,
                controller: true,
            });
        }

        let parent = template.object_ref();
        let assigned = self.cache.assign_next(&parent, &template.metadata.uid, |next| {
            candidate.status.version = next;
            VERSION_ASSIGNED.set_true(&mut candidate.status.conditions);
            self.store.update(&candidate)
        })?;

        info!(
            template = %parent,
            version = %assigned.object_ref(),
            number = assigned.status.version,
            "assigned version number"
        );
        self.enqueuer.enqueue(&parent.namespace, &parent.name);
        Ok(Some(assigned))
    }

    fn record_missing_template(&self, version: &ModelTemplateVersion) -> Result<(), ControllerError> {
        let message = format!(
            "template {}/{} not found",
            version.metadata.namespace, version.spec.template_name
        );
        let conditions = &version.status.conditions;
        if !VERSION_ASSIGNED.differs(
            conditions,
            ConditionStatus::False,
            REASON_TEMPLATE_NOT_FOUND,
            &message,
        ) {
            return Ok(());
        }

        let mut copy = version.clone();
        VERSION_ASSIGNED.set_false(
            &mut copy.status.conditions,
            REASON_TEMPLATE_NOT_FOUND,
            &message,
        );
        self.store.update(&copy)?;
        debug!(version = %version.object_ref(), %message, "version waiting for template");
        Ok(())
    }
}

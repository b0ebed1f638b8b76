//! Wires the versioning handlers onto the per-kind controllers.

use std::sync::Arc;

use modelver_core::model::{ModelTemplate, ModelTemplateVersion, VERSION_ASSIGNED};
use modelver_core::store::{Store, StoreResult};
use modelver_core::versioning::{
    ControllerError, Enqueuer, TemplateSynchronizer, VersionAssigner, VersionCache,
    seed_version_cache,
};
use tracing::info;

use crate::controller::Controller;
use crate::metrics::ControllerMetrics;

/// Keeps `status.defaultVersion` bound to the right child.
pub const HANDLER_SET_DEFAULT_VERSION: &str = "template-controller-set-default-version";

/// Mirrors the cache counter into `status.latestVersion` and drops the
/// counter on removal.
pub const HANDLER_SYNC_LATEST_VERSION: &str = "template-controller-sync-latest-version";

/// Numbers new template versions.
pub const HANDLER_ASSIGN_VERSION: &str = "template-controller-assign-version";

/// Seeds `cache` from the store, then registers every handler.
///
/// Seeding happens first so that no assignment can run against an empty
/// cache. Returns the number of assigned versions the cache was seeded
/// from.
///
/// # Errors
///
/// Returns an error if the store cannot be listed while seeding.
pub fn register<S: Store>(
    store: &Arc<S>,
    cache: &Arc<VersionCache>,
    templates: &Arc<Controller<ModelTemplate, S>>,
    versions: &Arc<Controller<ModelTemplateVersion, S>>,
    metrics: Option<ControllerMetrics>,
) -> StoreResult<usize> {
    let seeded = seed_version_cache(store.as_ref(), cache)?;
    info!(versions = seeded, "version cache seeded");

    let sync = Arc::new(TemplateSynchronizer::new(Arc::clone(store), Arc::clone(cache)));

    let handler = Arc::clone(&sync);
    templates.on_change(HANDLER_SET_DEFAULT_VERSION, move |key, template| {
        handler.set_default_version(key, template)
    });

    let handler = Arc::clone(&sync);
    templates.on_change(HANDLER_SYNC_LATEST_VERSION, move |key, template| {
        handler.sync_latest_version(key, template)
    });

    templates.on_remove(HANDLER_SYNC_LATEST_VERSION, move |key, template| {
        sync.delete_latest_version(key, template)
    });

    let enqueuer: Arc<dyn Enqueuer> = Arc::clone(templates) as Arc<dyn Enqueuer>;
    let assigner = VersionAssigner::new(Arc::clone(store), Arc::clone(cache), enqueuer);
    versions.on_change(HANDLER_ASSIGN_VERSION, move |key, version| {
        let was_assigned = version.is_some_and(|v| VERSION_ASSIGNED.is_true(&v.status.conditions));
        let result = assigner.assign_version(key, version)?;
        let now_assigned = result
            .as_ref()
            .is_some_and(|v| VERSION_ASSIGNED.is_true(&v.status.conditions));
        if now_assigned && !was_assigned {
            if let Some(metrics) = &metrics {
                metrics.version_assigned();
            }
        }
        Ok::<_, ControllerError>(result)
    });

    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use modelver_core::model::ObjectRef;
    use modelver_core::store::SqliteStore;

    use super::*;
    use crate::controller::Backoff;
    use crate::metrics::MetricsRegistry;

    struct Wiring {
        store: Arc<SqliteStore>,
        cache: Arc<VersionCache>,
        templates: Arc<Controller<ModelTemplate, SqliteStore>>,
        versions: Arc<Controller<ModelTemplateVersion, SqliteStore>>,
        registry: MetricsRegistry,
    }

    fn wiring(store: SqliteStore) -> Wiring {
        let store = Arc::new(store);
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.controller_metrics().clone();
        let templates = Arc::new(Controller::new(
            Arc::clone(&store),
            Backoff::default(),
            Some(metrics.clone()),
        ));
        let versions = Arc::new(Controller::new(
            Arc::clone(&store),
            Backoff::default(),
            Some(metrics.clone()),
        ));
        let cache = Arc::new(VersionCache::new());
        register(&store, &cache, &templates, &versions, Some(metrics)).unwrap();
        Wiring {
            store,
            cache,
            templates,
            versions,
            registry,
        }
    }

    fn key(name: &str) -> ObjectRef {
        ObjectRef::new("ml", name)
    }

    #[test]
    fn test_register_seeds_cache_before_handlers() {
        let store = SqliteStore::in_memory().unwrap();
        store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        let mut v = ModelTemplateVersion::new("ml", "v7", "llama");
        v.status.version = 7;
        VERSION_ASSIGNED.set_true(&mut v.status.conditions);
        store.create(&v).unwrap();

        let w = wiring(store);
        assert_eq!(w.cache.get(&key("llama")), 7);
    }

    #[test]
    fn test_version_key_assigns_and_enqueues_template() {
        let w = wiring(SqliteStore::in_memory().unwrap());
        w.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        w.store
            .create(&ModelTemplateVersion::new("ml", "v1", "llama"))
            .unwrap();

        w.versions.process_key(&key("v1")).unwrap();

        let v: ModelTemplateVersion = w.store.get("ml", "v1").unwrap();
        assert_eq!(v.status.version, 1);
        assert!(VERSION_ASSIGNED.is_true(&v.status.conditions));
        assert_eq!(w.templates.queue().len(), 1, "parent must be enqueued");

        let m = w.registry.controller_metrics();
        assert!((m.versions_assigned() - 1.0).abs() < f64::EPSILON);

        // Redelivery does not count again.
        w.versions.process_key(&key("v1")).unwrap();
        assert!((m.versions_assigned() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_template_key_binds_default_and_latest() {
        let w = wiring(SqliteStore::in_memory().unwrap());
        w.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        for name in ["v1", "v2"] {
            w.store
                .create(&ModelTemplateVersion::new("ml", name, "llama"))
                .unwrap();
            w.versions.process_key(&key(name)).unwrap();
        }

        w.templates.process_key(&key("llama")).unwrap();

        let t: ModelTemplate = w.store.get("ml", "llama").unwrap();
        assert_eq!(t.spec.default_version_id, "ml/v1");
        assert_eq!(t.status.default_version, 1);
        assert_eq!(t.status.latest_version, 2);

        let m = w.registry.controller_metrics();
        assert!(
            (m.handler_count("ModelTemplate", HANDLER_SET_DEFAULT_VERSION, true) - 1.0).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_missing_parent_fails_key_with_condition() {
        let w = wiring(SqliteStore::in_memory().unwrap());
        w.store
            .create(&ModelTemplateVersion::new("ml", "orphan", "ghost"))
            .unwrap();

        let err = w.versions.process_key(&key("orphan")).unwrap_err();
        assert!(err.to_string().contains(HANDLER_ASSIGN_VERSION));

        let v: ModelTemplateVersion = w.store.get("ml", "orphan").unwrap();
        assert!(VERSION_ASSIGNED.is_false(&v.status.conditions));
    }

    #[test]
    fn test_removed_template_drops_cache_entry() {
        let w = wiring(SqliteStore::in_memory().unwrap());
        w.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        w.store
            .create(&ModelTemplateVersion::new("ml", "v1", "llama"))
            .unwrap();
        w.versions.process_key(&key("v1")).unwrap();
        assert_eq!(w.cache.get(&key("llama")), 1);

        let template: ModelTemplate = w.store.get("ml", "llama").unwrap();
        w.store.delete::<ModelTemplate>("ml", "llama").unwrap();
        w.templates.record_tombstone(template);
        w.templates.process_key(&key("llama")).unwrap();

        assert_eq!(w.cache.get(&key("llama")), 0);
    }

    #[test]
    fn test_recreated_template_still_runs_removal() {
        let w = wiring(SqliteStore::in_memory().unwrap());
        w.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        w.store
            .create(&ModelTemplateVersion::new("ml", "v1", "llama"))
            .unwrap();
        w.versions.process_key(&key("v1")).unwrap();
        assert_eq!(w.cache.get(&key("llama")), 1);

        // Deleted and recreated before the template key is processed; both
        // changes collapse into one queued key.
        let old: ModelTemplate = w.store.get("ml", "llama").unwrap();
        w.store.delete::<ModelTemplate>("ml", "llama").unwrap();
        w.store.create(&ModelTemplate::new("ml", "llama")).unwrap();
        w.templates.record_tombstone(old);
        w.templates.process_key(&key("llama")).unwrap();
        assert_eq!(w.cache.get(&key("llama")), 0);

        let m = w.registry.controller_metrics();
        let runs = || m.handler_count("ModelTemplate", HANDLER_SYNC_LATEST_VERSION, true);
        assert!((runs() - 2.0).abs() < f64::EPSILON, "change and removal");
        w.templates.process_key(&key("llama")).unwrap();
        assert!((runs() - 3.0).abs() < f64::EPSILON, "tombstone is spent");

        w.store
            .create(&ModelTemplateVersion::new("ml", "n1", "llama"))
            .unwrap();
        w.versions.process_key(&key("n1")).unwrap();
        let n1: ModelTemplateVersion = w.store.get("ml", "n1").unwrap();
        assert_eq!(n1.status.version, 1);
        assert_eq!(w.cache.get(&key("llama")), 1);
    }
}

//! Daemon assembly: one store, one cache, two controllers and an informer.
//!
//! [`Daemon::new`] builds the controllers and registers the versioning
//! handlers (which seeds the version cache). [`Daemon::start`] spawns the
//! informer and the worker pools and returns a [`RunningDaemon`] used to
//! stop them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modelver_core::config::ControllerConfig;
use modelver_core::model::{ModelTemplate, ModelTemplateVersion};
use modelver_core::store::{Store, StoreResult};
use modelver_core::versioning::VersionCache;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::controller::{Backoff, Controller, Informer, InformerConfig, InformerError, KindHandle};
use crate::metrics::ControllerMetrics;
use crate::register::register;

/// Fully wired controller set, not yet running.
pub struct Daemon<S: Store> {
    store: Arc<S>,
    cache: Arc<VersionCache>,
    templates: Arc<Controller<ModelTemplate, S>>,
    versions: Arc<Controller<ModelTemplateVersion, S>>,
    informer_config: InformerConfig,
    workers: usize,
}

impl<S: Store> Daemon<S> {
    /// Builds both controllers and registers every handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cache cannot be seeded.
    pub fn new(
        store: Arc<S>,
        config: &ControllerConfig,
        metrics: Option<ControllerMetrics>,
    ) -> StoreResult<Self> {
        let backoff = Backoff::new(config.backoff_base(), config.backoff_max());
        let templates = Arc::new(Controller::new(
            Arc::clone(&store),
            backoff,
            metrics.clone(),
        ));
        let versions = Arc::new(Controller::new(
            Arc::clone(&store),
            backoff,
            metrics.clone(),
        ));
        let cache = Arc::new(VersionCache::new());
        register(&store, &cache, &templates, &versions, metrics)?;

        Ok(Self {
            store,
            cache,
            templates,
            versions,
            informer_config: InformerConfig::from_controller_config(config),
            workers: config.workers.max(1),
        })
    }

    /// The store every controller reads from.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The shared version cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    /// The template controller.
    #[must_use]
    pub const fn templates(&self) -> &Arc<Controller<ModelTemplate, S>> {
        &self.templates
    }

    /// The template version controller.
    #[must_use]
    pub const fn versions(&self) -> &Arc<Controller<ModelTemplateVersion, S>> {
        &self.versions
    }

    /// Spawns the informer and `workers` workers per controller.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self) -> RunningDaemon {
        let controllers: Vec<Arc<dyn KindHandle>> = vec![
            Arc::clone(&self.templates) as Arc<dyn KindHandle>,
            Arc::clone(&self.versions) as Arc<dyn KindHandle>,
        ];
        let informer = Arc::new(Informer::new(
            Arc::clone(&self.store),
            self.informer_config.clone(),
            controllers.clone(),
        ));
        let shutdown = informer.shutdown_handle();

        let mut workers = self.templates.start(self.workers);
        workers.extend(self.versions.start(self.workers));
        let informer = tokio::spawn(informer.run());

        info!(workers_per_kind = self.workers, "controllers started");
        RunningDaemon {
            shutdown,
            informer: Some(informer),
            controllers,
            workers,
        }
    }
}

/// Handle on the spawned informer and workers.
pub struct RunningDaemon {
    shutdown: Arc<AtomicBool>,
    informer: Option<JoinHandle<Result<(), InformerError>>>,
    controllers: Vec<Arc<dyn KindHandle>>,
    workers: Vec<JoinHandle<()>>,
}

async fn join_informer(
    handle: &mut JoinHandle<Result<(), InformerError>>,
) -> Result<(), InformerError> {
    handle
        .await
        .map_err(|e| InformerError::Join(e.to_string()))?
}

impl RunningDaemon {
    /// Resolves when the informer stops on its own, which only happens on a
    /// fatal error. Pending forever once the informer has been joined.
    pub async fn informer_exited(&mut self) -> Result<(), InformerError> {
        let Some(handle) = self.informer.as_mut() else {
            return std::future::pending().await;
        };
        let result = join_informer(handle).await;
        self.informer = None;
        result
    }

    /// Stops the informer, shuts every queue down and joins the workers.
    ///
    /// Keys still waiting in a queue are dropped; the next start re-lists
    /// them.
    ///
    /// # Errors
    ///
    /// Returns the informer's error, if it failed.
    pub async fn shutdown(mut self) -> Result<(), InformerError> {
        self.shutdown.store(true, Ordering::Relaxed);
        let result = match self.informer.as_mut() {
            Some(handle) => join_informer(handle).await,
            None => Ok(()),
        };
        for controller in &self.controllers {
            controller.shut_down();
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task failed during shutdown");
            }
        }
        info!("controllers stopped");
        result
    }
}

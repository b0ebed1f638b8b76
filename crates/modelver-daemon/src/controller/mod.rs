//! Per-kind controllers: named handlers driven by a work queue.
//!
//! A [`Controller`] owns the queue for one resource kind. The [`Informer`]
//! feeds it keys from the store's change log; its workers pop keys, read the
//! current object from the store and run every registered handler against
//! it. Handlers are level-triggered: they see the object as it is now, not
//! the change that caused the call.
//!
//! ```text
//! Store changes ─► Informer ─► WorkQueue<ObjectRef> ─► worker ─► spawn_blocking
//!                                   ▲                             │
//!                                   └── add_rate_limited (error) ◄┘
//! ```
//!
//! Per key, change handlers run in registration order; each receives the
//! object returned by the previous one. A failing handler does not stop the
//! ones after it; the key is re-queued with backoff once all have run.
//! Remove handlers run while the object is marked for deletion and once
//! more with its tombstone after it is gone. A tombstone whose uid differs
//! from the live object (deleted, then recreated under the same name before
//! the key was processed) still gets its remove handlers, ahead of the
//! change handlers of the new object.

mod informer;
mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use modelver_core::model::{ObjectRef, Resource};
use modelver_core::store::{Store, StoreError};
use modelver_core::versioning::Enqueuer;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use self::informer::{Informer, InformerConfig, InformerError, KindHandle};
pub use self::queue::{Backoff, WorkQueue};
use crate::metrics::ControllerMetrics;

/// Boxed error returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler signature shared by change and remove handlers.
///
/// Receives the `namespace/name` key and the object (`None` once it is
/// gone). Returns the object as the next handler should see it, or `None`
/// to pass the input through unchanged.
pub type Handler<R> = Arc<dyn Fn(&str, Option<&R>) -> Result<Option<R>, HandlerError> + Send + Sync>;

/// Dispatch errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Reading the object failed.
    #[error("failed to read {key}: {source}")]
    Read {
        /// Object key.
        key: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// One or more handlers failed.
    #[error("{count} handler(s) failed for {key}: {summary}")]
    Handlers {
        /// Object key.
        key: String,
        /// Number of failed handlers.
        count: usize,
        /// `handler: error` pairs joined with `; `.
        summary: String,
    },

    /// The blocking task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(String),
}

struct NamedHandler<R> {
    name: String,
    handler: Handler<R>,
}

/// Controller for one resource kind.
pub struct Controller<R: Resource, S: Store> {
    store: Arc<S>,
    queue: Arc<WorkQueue<ObjectRef>>,
    change_handlers: RwLock<Vec<NamedHandler<R>>>,
    remove_handlers: RwLock<Vec<NamedHandler<R>>>,
    tombstones: Mutex<HashMap<ObjectRef, R>>,
    metrics: Option<ControllerMetrics>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: Resource, S: Store> Controller<R, S> {
    /// Creates a controller with an empty queue and no handlers.
    pub fn new(store: Arc<S>, backoff: Backoff, metrics: Option<ControllerMetrics>) -> Self {
        Self {
            store,
            queue: Arc::new(WorkQueue::new(backoff)),
            change_handlers: RwLock::new(Vec::new()),
            remove_handlers: RwLock::new(Vec::new()),
            tombstones: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Registers a change handler under `name`.
    pub fn on_change<F, E>(&self, name: &str, handler: F)
    where
        F: Fn(&str, Option<&R>) -> Result<Option<R>, E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        let handler: Handler<R> = Arc::new(move |key, obj| handler(key, obj).map_err(Into::into));
        self.change_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NamedHandler {
                name: name.to_string(),
                handler,
            });
        debug!(kind = %R::KIND, handler = name, "registered change handler");
    }

    /// Registers a remove handler under `name`.
    pub fn on_remove<F, E>(&self, name: &str, handler: F)
    where
        F: Fn(&str, Option<&R>) -> Result<Option<R>, E> + Send + Sync + 'static,
        E: Into<HandlerError>,
    {
        let handler: Handler<R> = Arc::new(move |key, obj| handler(key, obj).map_err(Into::into));
        self.remove_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(NamedHandler {
                name: name.to_string(),
                handler,
            });
        debug!(kind = %R::KIND, handler = name, "registered remove handler");
    }

    /// The controller's work queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue<ObjectRef>> {
        &self.queue
    }

    /// The store the controller reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Remembers the last body of a removed object for its remove handlers.
    pub fn record_tombstone(&self, object: R) {
        lock(&self.tombstones).insert(object.object_ref(), object);
    }

    /// Runs every handler for `key` against the current object.
    ///
    /// Blocks on store I/O; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Read`] if the object cannot be read and
    /// [`DispatchError::Handlers`] if any handler failed.
    pub fn process_key(&self, key: &ObjectRef) -> Result<(), DispatchError> {
        let key_str = key.to_string();
        let current = match self.store.get::<R>(&key.namespace, &key.name) {
            Ok(object) => Some(object),
            Err(e) if e.is_not_found() => None,
            Err(source) => {
                return Err(DispatchError::Read {
                    key: key_str,
                    source,
                });
            },
        };

        let mut failures = Vec::new();
        let tombstone = lock(&self.tombstones).get(key).cloned();

        // A tombstone next to a live object belongs to an earlier object of
        // the same name. Its removal runs before the new object is handled.
        if let (Some(object), Some(old)) = (&current, &tombstone) {
            if old.metadata().uid == object.metadata().uid {
                self.clear_tombstone(key, &old.metadata().uid);
            } else {
                debug!(
                    kind = %R::KIND,
                    key = %key_str,
                    old_uid = %old.metadata().uid,
                    "running removal of replaced object"
                );
                self.run_remove_chain(&key_str, old.clone(), &mut failures);
                if failures.is_empty() {
                    self.clear_tombstone(key, &old.metadata().uid);
                }
            }
        }

        let spent = match (&current, &tombstone) {
            (None, Some(old)) => Some(old.metadata().uid.clone()),
            _ => None,
        };
        let removal = match &current {
            Some(object) if object.is_deleting() => Some(object.clone()),
            Some(_) => None,
            None => tombstone,
        };

        let handlers = self
            .change_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.run_chain(&key_str, current, &handlers, &mut failures);
        drop(handlers);

        if let Some(object) = removal {
            self.run_remove_chain(&key_str, object, &mut failures);
        }

        if failures.is_empty() {
            // The tombstone is spent once every remove handler succeeded.
            if let Some(uid) = spent {
                self.clear_tombstone(key, &uid);
            }
            return Ok(());
        }
        Err(DispatchError::Handlers {
            key: key_str,
            count: failures.len(),
            summary: failures.join("; "),
        })
    }

    fn run_remove_chain(&self, key: &str, object: R, failures: &mut Vec<String>) {
        let handlers = self
            .remove_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.run_chain(key, Some(object), &handlers, failures);
    }

    /// Drops the tombstone for `key` if it still belongs to `uid`.
    fn clear_tombstone(&self, key: &ObjectRef, uid: &str) {
        let mut tombstones = lock(&self.tombstones);
        if tombstones
            .get(key)
            .is_some_and(|t| t.metadata().uid == uid)
        {
            tombstones.remove(key);
        }
    }

    fn run_chain(
        &self,
        key: &str,
        mut current: Option<R>,
        handlers: &[NamedHandler<R>],
        failures: &mut Vec<String>,
    ) {
        for named in handlers {
            let result = (named.handler)(key, current.as_ref());
            let ok = result.is_ok();
            if let Some(metrics) = &self.metrics {
                metrics.handler_completed(R::KIND.as_str(), &named.name, ok);
            }
            match result {
                Ok(Some(next)) => current = Some(next),
                Ok(None) => {},
                Err(e) => {
                    debug!(kind = %R::KIND, %key, handler = %named.name, error = %e, "handler failed");
                    failures.push(format!("{}: {e}", named.name));
                },
            }
        }
    }

    /// Spawns `workers` worker tasks. They exit after the queue shuts down.
    pub fn start(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|_| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run_worker().await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>) {
        while let Some(key) = self.queue.get().await {
            let started = Instant::now();
            let this = Arc::clone(&self);
            let task_key = key.clone();
            let result = tokio::task::spawn_blocking(move || this.process_key(&task_key))
                .await
                .unwrap_or_else(|e| Err(DispatchError::Join(e.to_string())));

            match result {
                Ok(()) => self.queue.forget(&key),
                Err(e) => {
                    let delay = self.queue.add_rate_limited(key.clone());
                    let attempts = self.queue.num_requeues(&key);
                    if matches!(e, DispatchError::Join(_)) {
                        error!(kind = %R::KIND, %key, error = %e, "worker task failed");
                    } else {
                        warn!(
                            kind = %R::KIND,
                            %key,
                            error = %e,
                            attempts,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "reconcile failed, requeueing"
                        );
                    }
                    if let Some(metrics) = &self.metrics {
                        metrics.retry_scheduled(R::KIND.as_str());
                    }
                },
            }
            self.queue.done(&key);

            if let Some(metrics) = &self.metrics {
                metrics.observe_latency(R::KIND.as_str(), started.elapsed().as_secs_f64());
                metrics.set_queue_depth(R::KIND.as_str(), self.queue.len());
            }
        }
        debug!(kind = %R::KIND, "worker stopped");
    }
}

impl<R: Resource, S: Store> Enqueuer for Controller<R, S> {
    fn enqueue(&self, namespace: &str, name: &str) {
        self.queue.add(ObjectRef::new(namespace, name));
    }
}

//! Store tailer that feeds the per-kind controllers.
//!
//! The informer follows the store's change log by revision cursor:
//!
//! 1. On start it records the head revision, then lists every object of
//!    every registered kind and enqueues its key. Changes committed between
//!    the two steps are replayed by the first poll; the queue collapses the
//!    duplicate adds.
//! 2. Each poll reads the log after the cursor in batches. `Applied` entries
//!    enqueue the key; `Deleted` entries hand the tombstone to the controller
//!    first, then enqueue the key.
//! 3. Every `resync_interval` it lists everything again.
//! 4. Entries older than `cursor - change_retention` are compacted away.
//!
//! When shutdown is requested the informer stops polling and shuts down
//! every controller's queue, which releases the workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use modelver_core::config::ControllerConfig;
use modelver_core::model::{ObjectRef, Resource, ResourceKind};
use modelver_core::store::{Change, ChangeType, LabelSelector, Store, StoreError, StoreResult};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Controller;

/// Informer errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InformerError {
    /// A store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The blocking task panicked or was cancelled.
    #[error("informer task failed: {0}")]
    Join(String),
}

/// Configuration for the informer.
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Interval between change log polls.
    pub poll_interval: Duration,
    /// Interval between full re-lists; `None` disables resync.
    pub resync_interval: Option<Duration>,
    /// Maximum change log entries read per query.
    pub batch_size: usize,
    /// Change log entries kept behind the cursor; 0 disables compaction.
    pub change_retention: u64,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self::from_controller_config(&ControllerConfig::default())
    }
}

impl InformerConfig {
    /// Builds the informer settings from the controller section.
    #[must_use]
    pub const fn from_controller_config(config: &ControllerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            resync_interval: config.resync_interval(),
            batch_size: config.change_batch_size,
            change_retention: config.change_retention,
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the resync interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }
}

/// Kind-erased view of a controller, as seen by the informer.
pub trait KindHandle: Send + Sync {
    /// Resource kind this controller handles.
    fn kind(&self) -> ResourceKind;

    /// Enqueues one key.
    fn enqueue_key(&self, key: ObjectRef);

    /// Records the tombstone carried by a `Deleted` change.
    fn tombstone(&self, change: &Change);

    /// Lists every object of the kind and enqueues its key. Blocks on store
    /// I/O. Returns the number of keys enqueued.
    fn resync(&self) -> StoreResult<usize>;

    /// Shuts down the controller's queue.
    fn shut_down(&self);
}

impl<R: Resource, S: Store> KindHandle for Controller<R, S> {
    fn kind(&self) -> ResourceKind {
        R::KIND
    }

    fn enqueue_key(&self, key: ObjectRef) {
        self.queue().add(key);
    }

    fn tombstone(&self, change: &Change) {
        match change.tombstone::<R>() {
            Some(object) => self.record_tombstone(object),
            None => debug!(
                kind = %R::KIND,
                namespace = %change.namespace,
                name = %change.name,
                revision = change.revision,
                "deleted change carries no readable tombstone"
            ),
        }
    }

    fn resync(&self) -> StoreResult<usize> {
        let objects: Vec<R> = self.store().list(None, &LabelSelector::everything())?;
        let count = objects.len();
        for object in objects {
            self.queue().add(object.object_ref());
        }
        Ok(count)
    }

    fn shut_down(&self) {
        self.queue().shut_down();
    }
}

/// Follows the store's change log and enqueues keys on the controllers.
pub struct Informer<S> {
    store: Arc<S>,
    config: InformerConfig,
    handles: Vec<Arc<dyn KindHandle>>,
    cursor: AtomicU64,
    compacted_to: AtomicU64,
    shutdown: Arc<AtomicBool>,
}

impl<S: Store> Informer<S> {
    /// Creates an informer feeding `handles`.
    #[must_use]
    pub fn new(store: Arc<S>, config: InformerConfig, handles: Vec<Arc<dyn KindHandle>>) -> Self {
        Self {
            store,
            config,
            handles,
            cursor: AtomicU64::new(0),
            compacted_to: AtomicU64::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle for requesting shutdown.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Last change log revision delivered to the controllers.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    fn handle_for(&self, kind: ResourceKind) -> Option<&Arc<dyn KindHandle>> {
        self.handles.iter().find(|h| h.kind() == kind)
    }

    /// Positions the cursor at the current head and enqueues every object.
    ///
    /// Blocks on store I/O.
    pub fn prime(&self) -> StoreResult<usize> {
        let head = self.store.head_revision()?;
        self.cursor.store(head, Ordering::Release);
        let listed = self.resync()?;
        info!(revision = head, objects = listed, "informer primed");
        Ok(listed)
    }

    /// Lists every registered kind and enqueues every key.
    ///
    /// Blocks on store I/O.
    pub fn resync(&self) -> StoreResult<usize> {
        let mut total = 0;
        for handle in &self.handles {
            let count = handle.resync()?;
            debug!(kind = %handle.kind(), objects = count, "resynced");
            total += count;
        }
        Ok(total)
    }

    /// Delivers every change after the cursor. Returns the number of changes
    /// delivered.
    ///
    /// Blocks on store I/O.
    pub fn poll_once(&self) -> StoreResult<usize> {
        let limit = self.config.batch_size.max(1);
        let mut delivered = 0;
        loop {
            let changes = self.store.changes_since(self.cursor(), limit)?;
            let fetched = changes.len();
            for change in &changes {
                self.deliver(change);
                self.cursor.fetch_max(change.revision, Ordering::AcqRel);
            }
            delivered += fetched;
            if fetched < limit {
                return Ok(delivered);
            }
        }
    }

    fn deliver(&self, change: &Change) {
        let Some(handle) = self.handle_for(change.kind) else {
            return;
        };
        if change.change_type == ChangeType::Deleted {
            handle.tombstone(change);
        }
        debug!(
            kind = %change.kind,
            namespace = %change.namespace,
            name = %change.name,
            change = change.change_type.as_str(),
            revision = change.revision,
            "change observed"
        );
        handle.enqueue_key(ObjectRef::new(change.namespace.as_str(), change.name.as_str()));
    }

    /// Drops change log entries more than `change_retention` revisions
    /// behind the cursor. Returns the number of entries removed.
    ///
    /// Blocks on store I/O.
    pub fn compact(&self) -> StoreResult<u64> {
        let retention = self.config.change_retention;
        if retention == 0 {
            return Ok(0);
        }
        let up_to = self.cursor().saturating_sub(retention);
        if up_to <= self.compacted_to.load(Ordering::Acquire) {
            return Ok(0);
        }
        let removed = self.store.compact_changes(up_to)?;
        self.compacted_to.fetch_max(up_to, Ordering::AcqRel);
        if removed > 0 {
            debug!(up_to, removed, "compacted change log");
        }
        Ok(removed)
    }

    /// Runs the informer loop until shutdown is requested, then shuts down
    /// every controller queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial list fails. Errors during polling are
    /// logged and retried on the next tick.
    #[allow(clippy::cast_possible_truncation)] // poll_interval is always < u64::MAX ms
    pub async fn run(self: Arc<Self>) -> Result<(), InformerError> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            resync_interval_secs = self.config.resync_interval.map(|d| d.as_secs()),
            batch_size = self.config.batch_size,
            kinds = self.handles.len(),
            "informer starting"
        );

        let primed = self.blocking(Self::prime).await;
        if let Err(e) = primed {
            self.shut_down_controllers();
            return Err(e);
        }
        let mut last_resync = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.blocking(Self::poll_once).await {
                Ok(0) => {},
                Ok(n) => debug!(changes = n, cursor = self.cursor(), "delivered changes"),
                Err(e) => warn!(error = %e, "error polling change log"),
            }

            if let Some(interval) = self.config.resync_interval {
                if last_resync.elapsed() >= interval {
                    if let Err(e) = self.blocking(Self::resync).await {
                        warn!(error = %e, "error during resync");
                    }
                    last_resync = Instant::now();
                }
            }

            if let Err(e) = self.blocking(Self::compact).await {
                warn!(error = %e, "error compacting change log");
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        info!(cursor = self.cursor(), "informer shutting down");
        self.shut_down_controllers();
        Ok(())
    }

    async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, InformerError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> StoreResult<T> + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(|e| InformerError::Join(e.to_string()))?
            .map_err(InformerError::from)
    }

    fn shut_down_controllers(&self) {
        for handle in &self.handles {
            handle.shut_down();
        }
    }
}

//! Version numbering and template status synchronization.
//!
//! # Overview
//!
//! ```text
//! version change ──► VersionAssigner ──► store.update(version #n, assigned=True)
//!                        │    ▲                     │
//!                        │    └── VersionCache ◄────┘ (advanced after commit)
//!                        ▼
//!                 Enqueuer::enqueue(template)
//!                        │
//! template change ──► TemplateSynchronizer ──► store.update(template status)
//! template remove ──► TemplateSynchronizer ──► VersionCache::delete
//! ```
//!
//! Handlers are level-triggered: each call recomputes what the object should
//! look like from what it looks like now, so redelivery, reordering and
//! concurrent calls for different keys are all safe. Errors are retryable
//! and the dispatcher owns the retry.
//!
//! # Numbering
//!
//! For a fixed template the assigned numbers are always `1..=k` with no
//! gaps or duplicates. [`VersionCache::assign_next`] holds the template's
//! slot across read, durable write and increment. The cache is rebuilt from
//! the store by [`seed_version_cache`] before any handler runs.
//!
//! Slots are tied to the uid of the template that claimed them, so a
//! template recreated under an old name numbers from 1 and a late removal of
//! its predecessor leaves the new counter alone. Versions of a template that
//! is being deleted are not numbered.

mod assigner;
mod cache;
mod error;
mod synchronizer;


pub use assigner::{REASON_TEMPLATE_NOT_FOUND, VersionAssigner};
pub use cache::{VersionCache, seed_version_cache};
pub use error::ControllerError;
pub use synchronizer::TemplateSynchronizer;

/// Requests another asynchronous pass of an object's change handlers.
///
/// Best-effort: the call returns immediately and correctness never depends
/// on the re-run happening before the caller returns.
pub trait Enqueuer: Send + Sync {
    /// Schedules `namespace/name` for reprocessing.
    fn enqueue(&self, namespace: &str, name: &str);
}

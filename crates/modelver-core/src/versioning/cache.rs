//! In-memory high-water mark of assigned version numbers per template.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::model::{ModelTemplateVersion, ObjectRef, VERSION_ASSIGNED};
use crate::store::{LabelSelector, Store, StoreResult};

/// Highest version number assigned per template, keyed by template ref.
///
/// Each template has its own slot lock. [`VersionCache::assign_next`] holds
/// that lock across the read, the durable write and the increment, so two
/// versions of the same template can never be handed the same number.
/// Slots of different templates never contend.
///
/// A slot remembers the uid of the template it counts for. A template
/// recreated under the same name has a new uid and starts again at 1, even
/// if the removal of its predecessor has not been processed yet.
#[derive(Debug, Default)]
pub struct VersionCache {
    slots: Mutex<HashMap<ObjectRef, Arc<Mutex<Slot>>>>,
}

#[derive(Debug, Default)]
struct Slot {
    /// Uid of the owning template; empty until an assignment claims it.
    owner: String,
    latest: u64,
    /// Set once the slot is dropped from the map.
    retired: bool,
}

impl Slot {
    fn belongs_to(&self, owner: &str) -> bool {
        self.owner.is_empty() || self.owner == owner
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VersionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &ObjectRef) -> Arc<Mutex<Slot>> {
        Arc::clone(lock(&self.slots).entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &ObjectRef) -> Option<Arc<Mutex<Slot>>> {
        lock(&self.slots).get(key).cloned()
    }

    /// Runs `f` on the live slot for `key`, creating it if needed.
    fn with_slot<T>(&self, key: &ObjectRef, f: impl FnOnce(&mut Slot) -> T) -> T {
        loop {
            let slot = self.slot(key);
            let mut guard = lock(&slot);
            if !guard.retired {
                return f(&mut guard);
            }
        }
    }

    /// Returns the highest assigned number for `key`, 0 if unknown.
    ///
    /// Blocks while an assignment for the same key is in flight.
    #[must_use]
    pub fn get(&self, key: &ObjectRef) -> u64 {
        self.existing_slot(key).map_or(0, |slot| lock(&slot).latest)
    }

    /// Like [`get`](Self::get), but 0 when the slot counts for another
    /// template uid.
    #[must_use]
    pub fn latest_for(&self, key: &ObjectRef, owner: &str) -> u64 {
        self.existing_slot(key).map_or(0, |slot| {
            let slot = lock(&slot);
            if slot.belongs_to(owner) { slot.latest } else { 0 }
        })
    }

    /// Advances the counter for `key` by one and returns the new value.
    pub fn increment(&self, key: &ObjectRef) -> u64 {
        self.with_slot(key, |slot| {
            slot.latest += 1;
            slot.latest
        })
    }

    /// Forgets `key`. No-op if absent.
    ///
    /// Waits for an in-flight assignment on the same key to finish first.
    /// Callers already waiting on the removed slot move to a fresh one.
    pub fn delete(&self, key: &ObjectRef) {
        self.remove_if(key, |_| true);
    }

    /// Forgets `key` only if its slot counts for the template `owner`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn delete_owned(&self, key: &ObjectRef, owner: &str) -> bool {
        self.remove_if(key, |slot| slot.belongs_to(owner))
    }

    fn remove_if(&self, key: &ObjectRef, pred: impl FnOnce(&Slot) -> bool) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let mut guard = lock(&slot);
        if guard.retired || !pred(&guard) {
            return false;
        }
        let mut slots = lock(&self.slots);
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            slots.remove(key);
        }
        drop(slots);
        guard.retired = true;
        true
    }

    /// Raises the counter for `key` to at least `version`.
    pub fn observe(&self, key: &ObjectRef, version: u64) {
        self.with_slot(key, |slot| slot.latest = slot.latest.max(version));
    }

    /// Copies the current counters, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ObjectRef, u64> {
        let slots: Vec<_> = lock(&self.slots)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        slots
            .into_iter()
            .map(|(k, slot)| {
                let v = lock(&slot).latest;
                (k, v)
            })
            .collect()
    }

    /// Reserves the next number for `key` and commits it through `write`.
    ///
    /// `owner` is the uid of the template being numbered. A slot claimed by
    /// another uid is restarted from zero; an unclaimed (seeded) slot is
    /// claimed as is. `write` receives `current + 1` and must durably
    /// persist it. The counter advances only if `write` returns `Ok`; on
    /// error nothing changes and the same number is offered to the next
    /// caller. Calls for the same key are serialized, so `write` must not
    /// call back into this cache for the same key.
    pub fn assign_next<T, E>(
        &self,
        key: &ObjectRef,
        owner: &str,
        write: impl FnOnce(u64) -> Result<T, E>,
    ) -> Result<T, E> {
        self.with_slot(key, |slot| {
            let base = if slot.belongs_to(owner) { slot.latest } else { 0 };
            let committed = write(base + 1)?;
            if !slot.belongs_to(owner) {
                debug!(
                    template = %key,
                    previous = %slot.owner,
                    %owner,
                    "version counter restarted for recreated template"
                );
            }
            slot.owner = owner.to_string();
            slot.latest = base + 1;
            Ok(committed)
        })
    }
}

/// Rebuilds the cache from every assigned template version in the store.
///
/// Returns the number of assigned versions observed. Run this once before
/// any handler is allowed to assign numbers.
pub fn seed_version_cache<S: Store>(store: &S, cache: &VersionCache) -> StoreResult<usize> {
    let versions: Vec<ModelTemplateVersion> = store.list(None, &LabelSelector::everything())?;
    let mut seeded = 0;
    for version in &versions {
        if !VERSION_ASSIGNED.is_true(&version.status.conditions) {
            continue;
        }
        let key = ObjectRef::new(
            version.metadata.namespace.clone(),
            version.spec.template_name.clone(),
        );
        cache.observe(&key, version.status.version);
        seeded += 1;
    }
    debug!(listed = versions.len(), seeded, "version cache seeded");
    Ok(seeded)
}

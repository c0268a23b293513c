//! Key → entry table with per-key change notification.
//!
//! Each key owns a `watch` channel holding its current [`CacheEntry`]; every
//! write replaces the channel value, so subscribers always observe the latest
//! state. Writes to one key are serialized by the map shard holding it.
//!
//! Ordering between fetches and local writes is resolved with a process-wide
//! epoch counter. Issuing a fetch, `set` and `patch` stamp the slot with a
//! fresh epoch; a fetch completion only applies when the slot still carries
//! the epoch the fetch was issued under. Invalidation stamps a separate
//! marker so an in-flight result still lands but stays stale.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::entry::{CacheEntry, FetchStatus, Staleness};
use super::error::ErrorInfo;
use super::keys::{KeyPattern, ResourceKey};
use super::payload::Payload;
use super::registry::KeyRegistry;

/// Monotonic write stamp.
pub type Epoch = u64;

const METRIC_INVALIDATED: &str = "cms_cache_invalidated_total";
const METRIC_SESSION_RESET: &str = "cms_cache_session_reset_total";

/// Result of applying an updater to a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No entry or no data to patch.
    Missing,
    /// The updater declined to change the payload.
    Unchanged,
    Applied,
}

/// Point-in-time counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub stale: usize,
    pub loading: usize,
    pub errored: usize,
}

struct Slot {
    tx: watch::Sender<CacheEntry>,
    epoch: Epoch,
    invalidated_at: Epoch,
}

impl Slot {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(CacheEntry::idle());
        Self {
            tx,
            epoch: 0,
            invalidated_at: 0,
        }
    }

    fn current(&self) -> CacheEntry {
        self.tx.borrow().clone()
    }

    fn replace(&self, entry: CacheEntry) {
        self.tx.send_replace(entry);
    }
}

pub struct CacheStore {
    slots: DashMap<ResourceKey, Slot>,
    registry: Arc<KeyRegistry>,
    next_epoch: AtomicU64,
}

impl CacheStore {
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self {
            slots: DashMap::new(),
            registry,
            next_epoch: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    fn advance_epoch(&self) -> Epoch {
        self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn slot_mut(
        &self,
        key: &ResourceKey,
    ) -> dashmap::mapref::one::RefMut<'_, ResourceKey, Slot> {
        self.slots.entry(key.clone()).or_insert_with(|| {
            self.registry.track(key);
            Slot::new()
        })
    }

    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        self.slots.get(key).map(|slot| slot.current())
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Epoch of the latest superseding write to a key.
    pub fn epoch_of(&self, key: &ResourceKey) -> Option<Epoch> {
        self.slots.get(key).map(|slot| slot.epoch)
    }

    /// Replace a key's data outright. Supersedes any in-flight fetch.
    pub fn set(&self, key: &ResourceKey, payload: Payload) {
        let epoch = self.advance_epoch();
        let mut slot = self.slot_mut(key);
        slot.epoch = epoch;
        let mut entry = slot.current();
        entry.data = Some(Arc::new(payload));
        entry.status = FetchStatus::Success;
        entry.error = None;
        entry.fetched_at = Some(OffsetDateTime::now_utc());
        entry.invalidated = false;
        slot.replace(entry);
    }

    /// Apply an updater to the cached payload of a key.
    pub fn patch<F>(&self, key: &ResourceKey, updater: F) -> PatchOutcome
    where
        F: FnOnce(&Payload) -> Payload,
    {
        match self.try_patch(key, |payload| Ok::<_, Infallible>(Some(updater(payload)))) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Apply a fallible updater. `Ok(None)` from the updater leaves the
    /// entry untouched; an error is returned without modifying anything.
    pub fn try_patch<F, E>(&self, key: &ResourceKey, updater: F) -> Result<PatchOutcome, E>
    where
        F: FnOnce(&Payload) -> Result<Option<Payload>, E>,
    {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(PatchOutcome::Missing);
        };
        let mut entry = slot.current();
        let Some(current) = entry.data.as_deref() else {
            return Ok(PatchOutcome::Missing);
        };
        let Some(patched) = updater(current)? else {
            return Ok(PatchOutcome::Unchanged);
        };

        slot.epoch = self.advance_epoch();
        entry.data = Some(Arc::new(patched));
        if entry.status == FetchStatus::Loading {
            entry.status = FetchStatus::Success;
        }
        slot.replace(entry);
        Ok(PatchOutcome::Applied)
    }

    /// Drop a key. Subscribers receive an idle entry, then the channel closes.
    pub fn remove(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let (_, slot) = self.slots.remove(key)?;
        self.registry.untrack(key);
        Some(slot.tx.send_replace(CacheEntry::idle()))
    }

    /// Mark every live key matching the pattern stale. Data is kept, and
    /// repeating the call changes nothing further.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let keys = self.registry.keys_matching(pattern);
        let marked = keys.iter().filter(|key| self.invalidate_key(key)).count();
        debug!(pattern = %pattern, matched = keys.len(), marked, "Invalidated cache keys");
        marked
    }

    /// Mark one key stale. Returns `true` when the key exists.
    pub fn invalidate_key(&self, key: &ResourceKey) -> bool {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return false;
        };
        slot.invalidated_at = self.advance_epoch();
        let changed = slot.tx.send_if_modified(|entry| {
            if entry.invalidated {
                false
            } else {
                entry.invalidated = true;
                true
            }
        });
        if changed {
            counter!(METRIC_INVALIDATED).increment(1);
        }
        true
    }

    /// Clear every entry of every family.
    pub fn reset(&self) -> usize {
        let mut cleared = 0;
        self.slots.retain(|key, slot| {
            slot.replace(CacheEntry::idle());
            self.registry.untrack(key);
            cleared += 1;
            false
        });
        counter!(METRIC_SESSION_RESET).increment(1);
        warn!(cleared, "Cache session reset");
        cleared
    }

    /// Receiver for a key's entry, creating an idle entry when absent.
    pub fn subscribe(&self, key: &ResourceKey) -> watch::Receiver<CacheEntry> {
        self.slot_mut(key).tx.subscribe()
    }

    /// Record that a fetch was issued and return the epoch it carries.
    pub fn begin_fetch(&self, key: &ResourceKey, stale_after: Staleness) -> Epoch {
        let epoch = self.advance_epoch();
        let mut slot = self.slot_mut(key);
        slot.epoch = epoch;
        slot.tx.send_modify(|entry| {
            entry.status = FetchStatus::Loading;
            entry.stale_after = stale_after;
        });
        epoch
    }

    /// Deliver a fetch result. Returns `false` when the result was discarded
    /// because a later write superseded it or the key is gone.
    pub fn complete_fetch(
        &self,
        key: &ResourceKey,
        epoch: Epoch,
        result: Result<Payload, ErrorInfo>,
    ) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        if slot.epoch != epoch {
            return false;
        }

        let mut entry = slot.current();
        match result {
            Ok(payload) => {
                entry.data = Some(Arc::new(payload));
                entry.status = FetchStatus::Success;
                entry.error = None;
                entry.fetched_at = Some(OffsetDateTime::now_utc());
                entry.invalidated = slot.invalidated_at > epoch;
            }
            Err(error) => {
                entry.status = FetchStatus::Error;
                entry.error = Some(error);
            }
        }
        slot.replace(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let now = OffsetDateTime::now_utc();
        let mut stats = StoreStats::default();
        for slot in self.slots.iter() {
            let entry = slot.tx.borrow();
            stats.entries += 1;
            if entry.data.is_some() && entry.is_stale_at(now) {
                stats.stale += 1;
            }
            match entry.status {
                FetchStatus::Loading => stats.loading += 1,
                FetchStatus::Error => stats.errored += 1,
                FetchStatus::Idle | FetchStatus::Success => {}
            }
        }
        stats
    }
}

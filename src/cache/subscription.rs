use time::OffsetDateTime;
use tokio::sync::watch;

use super::entry::CacheEntry;
use super::fetch::FetchExecutor;
use super::keys::ResourceKey;

/// Stream of entry snapshots for one key.
///
/// Ends with `None` once the key is removed or the session is reset.
/// Observing an invalidated entry starts one refetch per fetched snapshot, so
/// subscribers converge after invalidation without polling. A refetch that
/// fails is not repeated; retrying is up to the caller.
pub struct Subscription {
    key: ResourceKey,
    rx: watch::Receiver<CacheEntry>,
    executor: FetchExecutor,
    revalidated: Option<OffsetDateTime>,
}

impl Subscription {
    pub(crate) fn new(
        key: ResourceKey,
        rx: watch::Receiver<CacheEntry>,
        executor: FetchExecutor,
    ) -> Self {
        Self {
            key,
            rx,
            executor,
            revalidated: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn current(&self) -> CacheEntry {
        self.rx.borrow().clone()
    }

    /// Wait for the next change of the entry.
    pub async fn next(&mut self) -> Option<CacheEntry> {
        self.rx.changed().await.ok()?;
        let entry = self.rx.borrow_and_update().clone();
        if self.rx.has_changed().is_err() {
            return None;
        }
        if self.needs_revalidation(&entry) && self.executor.trigger_revalidate(&self.key) {
            self.revalidated = entry.fetched_at;
        }
        Some(entry)
    }

    // A failed refetch keeps `fetched_at`, so the same snapshot is never
    // revalidated twice.
    fn needs_revalidation(&self, entry: &CacheEntry) -> bool {
        entry.invalidated
            && entry.data.is_some()
            && !entry.is_loading()
            && entry.fetched_at.is_some()
            && entry.fetched_at != self.revalidated
    }
}

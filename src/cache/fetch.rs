//! Fetch executor: serves cached entries and keeps at most one request in
//! flight per key.
//!
//! Requests run on spawned tasks, so a caller that stops waiting never
//! cancels the fetch other callers joined. Each in-flight request carries the
//! epoch the store stamped when it was issued; callers only join a request
//! whose epoch is still the key's latest, and a forced refetch replaces it.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::entry::{CacheEntry, Staleness};
use super::error::{ErrorInfo, RemoteError};
use super::keys::{KeyPattern, ResourceKey};
use super::payload::Payload;
use super::store::{CacheStore, Epoch};
use super::subscription::Subscription;

const METRIC_HIT: &str = "cms_cache_hit_total";
const METRIC_MISS: &str = "cms_cache_miss_total";
const METRIC_FETCH: &str = "cms_cache_fetch_total";
const METRIC_FETCH_JOINED: &str = "cms_cache_fetch_joined_total";
const METRIC_FETCH_DISCARDED: &str = "cms_cache_fetch_discarded_total";
const METRIC_FETCH_MS: &str = "cms_cache_fetch_ms";

/// Future resolving to a normalized payload.
pub type FetchFuture = BoxFuture<'static, Result<Payload, RemoteError>>;

/// Produces the request for a key each time the executor issues one.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self) -> FetchFuture;
}

impl<F> Fetcher for F
where
    F: Fn() -> FetchFuture + Send + Sync + 'static,
{
    fn fetch(&self) -> FetchFuture {
        self()
    }
}

/// Per-key freshness and refetch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchOptions {
    pub stale_after: Staleness,
    pub refetch_on_focus: bool,
    pub refetch_interval: Option<Duration>,
}

impl FetchOptions {
    pub fn stale_after(mut self, window: Duration) -> Self {
        self.stale_after = Staleness::After(window);
        self
    }

    pub fn refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    /// A zero period disables interval refetching.
    pub fn refetch_interval(mut self, period: Option<Duration>) -> Self {
        self.refetch_interval = period.filter(|period| !period.is_zero());
        self
    }
}

type Completion = Shared<BoxFuture<'static, ()>>;

#[derive(Clone)]
struct InFlight {
    epoch: Epoch,
    done: Completion,
}

/// Removes a finished request from the in-flight table, including when the
/// fetch task panics or is cancelled.
struct InFlightGuard {
    key: ResourceKey,
    epoch: Epoch,
    inflight: Arc<DashMap<ResourceKey, InFlight>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inflight
            .remove_if(&self.key, |_, inflight| inflight.epoch == self.epoch);
    }
}

struct Registration {
    fetcher: Arc<dyn Fetcher>,
    options: FetchOptions,
    interval: Option<AbortHandle>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(handle) = self.interval.take() {
            handle.abort();
        }
    }
}

struct ExecutorInner {
    store: Arc<CacheStore>,
    inflight: Arc<DashMap<ResourceKey, InFlight>>,
    registrations: DashMap<ResourceKey, Registration>,
}

/// Cloneable handle to the shared executor state.
#[derive(Clone)]
pub struct FetchExecutor {
    inner: Arc<ExecutorInner>,
}

impl FetchExecutor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                store,
                inflight: Arc::new(DashMap::new()),
                registrations: DashMap::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Current entry for a key, idle when nothing is cached.
    pub fn entry(&self, key: &ResourceKey) -> CacheEntry {
        self.inner.store.get(key).unwrap_or_default()
    }

    /// Return the cached entry without waiting. A fresh entry is served
    /// as-is; otherwise a request is started (or joined) in the background
    /// and the current, possibly stale, entry is returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn read(
        &self,
        key: &ResourceKey,
        fetcher: impl Fetcher,
        options: FetchOptions,
    ) -> CacheEntry {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.register(key, Arc::clone(&fetcher), options);
        if let Some(entry) = self.fresh(key) {
            return entry;
        }
        self.ensure_inflight(key, &fetcher, &options, false);
        self.entry(key)
    }

    /// Like [`FetchExecutor::read`], but waits for the request it started or
    /// joined before returning the entry.
    pub async fn fetch(
        &self,
        key: &ResourceKey,
        fetcher: impl Fetcher,
        options: FetchOptions,
    ) -> CacheEntry {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.register(key, Arc::clone(&fetcher), options);
        if let Some(entry) = self.fresh(key) {
            return entry;
        }
        let inflight = self.ensure_inflight(key, &fetcher, &options, false);
        self.settle(key, inflight).await
    }

    /// Issue a new request regardless of freshness, superseding any request
    /// already in flight.
    pub async fn refetch(
        &self,
        key: &ResourceKey,
        fetcher: impl Fetcher,
        options: FetchOptions,
    ) -> CacheEntry {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.register(key, Arc::clone(&fetcher), options);
        let inflight = self.ensure_inflight(key, &fetcher, &options, true);
        self.settle(key, inflight).await
    }

    /// Refresh a key with the fetcher it was last read with and wait for the
    /// result. `None` when the key was never read.
    pub async fn revalidate(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let inflight = self.start_registered(key)?;
        Some(self.settle(key, inflight).await)
    }

    /// Start refreshing a key with the fetcher it was last read with.
    pub fn trigger_revalidate(&self, key: &ResourceKey) -> bool {
        self.start_registered(key).is_some()
    }

    /// Subscribe to a key, loading it first when it holds no fresh data.
    pub fn subscribe(
        &self,
        key: &ResourceKey,
        fetcher: impl Fetcher,
        options: FetchOptions,
    ) -> Subscription {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        self.register(key, Arc::clone(&fetcher), options);
        let rx = self.inner.store.subscribe(key);
        if self.fresh(key).is_none() {
            self.ensure_inflight(key, &fetcher, &options, false);
        }
        Subscription::new(key.clone(), rx, self.clone())
    }

    /// Mark keys stale. Subscribers refetch when they observe the change.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        self.inner.store.invalidate(pattern)
    }

    /// Refetch stale keys whose options ask for it on focus. Returns the
    /// number of requests started or joined.
    pub fn focus_gained(&self) -> usize {
        let candidates: Vec<(ResourceKey, Arc<dyn Fetcher>, FetchOptions)> = self
            .inner
            .registrations
            .iter()
            .filter(|registration| registration.options.refetch_on_focus)
            .map(|registration| {
                (
                    registration.key().clone(),
                    Arc::clone(&registration.fetcher),
                    registration.options,
                )
            })
            .collect();

        candidates
            .into_iter()
            .filter(|(key, _, _)| self.inner.store.get(key).is_none_or(|entry| entry.is_stale()))
            .map(|(key, fetcher, options)| self.ensure_inflight(&key, &fetcher, &options, false))
            .count()
    }

    /// End the session: clear every entry, forget in-flight requests and stop
    /// interval refetching.
    pub fn reset_session(&self) {
        self.inner.registrations.clear();
        self.inner.inflight.clear();
        self.inner.store.reset();
    }

    /// Stop interval refetch tasks. Cached entries are left untouched.
    pub fn shutdown(&self) {
        for mut registration in self.inner.registrations.iter_mut() {
            if let Some(handle) = registration.interval.take() {
                handle.abort();
            }
        }
    }

    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    fn fresh(&self, key: &ResourceKey) -> Option<CacheEntry> {
        match self.inner.store.get(key) {
            Some(entry) if entry.is_fresh() => {
                counter!(METRIC_HIT).increment(1);
                debug!(key = %key, "Cache hit");
                Some(entry)
            }
            _ => {
                counter!(METRIC_MISS).increment(1);
                None
            }
        }
    }

    fn register(&self, key: &ResourceKey, fetcher: Arc<dyn Fetcher>, options: FetchOptions) {
        let period = options.refetch_interval.filter(|period| !period.is_zero());
        match self.inner.registrations.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let registration = occupied.get_mut();
                registration.fetcher = fetcher;
                let previous = registration.options.refetch_interval;
                registration.options = options;
                if previous != options.refetch_interval || registration.interval.is_none() {
                    if let Some(handle) = registration.interval.take() {
                        handle.abort();
                    }
                    registration.interval = period.map(|period| self.spawn_interval(key, period));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Registration {
                    fetcher,
                    options,
                    interval: period.map(|period| self.spawn_interval(key, period)),
                });
            }
        }
    }

    fn start_registered(&self, key: &ResourceKey) -> Option<InFlight> {
        let (fetcher, options) = self
            .inner
            .registrations
            .get(key)
            .map(|registration| (Arc::clone(&registration.fetcher), registration.options))?;
        Some(self.ensure_inflight(key, &fetcher, &options, false))
    }

    fn ensure_inflight(
        &self,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher>,
        options: &FetchOptions,
        force: bool,
    ) -> InFlight {
        match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = self.inner.store.epoch_of(key);
                if !force && Some(occupied.get().epoch) == current {
                    counter!(METRIC_FETCH_JOINED).increment(1);
                    debug!(key = %key, epoch = occupied.get().epoch, "Joined in-flight fetch");
                    return occupied.get().clone();
                }
                let inflight = self.issue(key, fetcher, options);
                occupied.insert(inflight.clone());
                inflight
            }
            Entry::Vacant(vacant) => {
                let inflight = self.issue(key, fetcher, options);
                vacant.insert(inflight.clone());
                inflight
            }
        }
    }

    fn issue(
        &self,
        key: &ResourceKey,
        fetcher: &Arc<dyn Fetcher>,
        options: &FetchOptions,
    ) -> InFlight {
        let epoch = self.inner.store.begin_fetch(key, options.stale_after);
        counter!(METRIC_FETCH).increment(1);
        debug!(key = %key, epoch, "Issuing fetch");

        let request = fetcher.fetch();
        let guard = InFlightGuard {
            key: key.clone(),
            epoch,
            inflight: Arc::clone(&self.inner.inflight),
        };
        let executor = self.clone();
        let handle = tokio::spawn(async move {
            let started_at = Instant::now();
            let result = request.await;
            histogram!(METRIC_FETCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
            executor.complete(&guard.key, epoch, result);
            drop(guard);
        });

        InFlight {
            epoch,
            done: handle.map(|_| ()).boxed().shared(),
        }
    }

    fn complete(&self, key: &ResourceKey, epoch: Epoch, result: Result<Payload, RemoteError>) {
        let result = match result {
            Ok(payload) => Ok(payload),
            Err(error) if error.is_auth() => {
                warn!(key = %key, error = %error, "Authentication rejected; resetting cache session");
                self.reset_session();
                return;
            }
            Err(error) => {
                warn!(key = %key, error = %error, "Fetch failed");
                Err(ErrorInfo::from(&error))
            }
        };

        if !self.inner.store.complete_fetch(key, epoch, result) {
            counter!(METRIC_FETCH_DISCARDED).increment(1);
            debug!(key = %key, epoch, "Discarded superseded fetch result");
        }
    }

    /// Wait for a request, then for any newer request that superseded it.
    async fn settle(&self, key: &ResourceKey, inflight: InFlight) -> CacheEntry {
        let InFlight { mut epoch, mut done } = inflight;
        loop {
            done.await;
            let newer = self
                .inner
                .inflight
                .get(key)
                .filter(|next| next.epoch > epoch)
                .map(|next| InFlight::clone(&next));
            match newer {
                Some(next) => {
                    epoch = next.epoch;
                    done = next.done;
                }
                None => break,
            }
        }
        self.entry(key)
    }

    fn spawn_interval(&self, key: &ResourceKey, period: Duration) -> AbortHandle {
        let executor = Arc::downgrade(&self.inner);
        let key = key.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                let Some(inner) = Weak::upgrade(&executor) else {
                    break;
                };
                FetchExecutor { inner }.trigger_revalidate(&key);
            }
        })
        .abort_handle()
    }
}

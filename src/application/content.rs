//! Typed access to the content families through the shared cache.
//!
//! Builds keys, wires each key to the REST path its family declares, and
//! routes writes through the mutation coordinator so every loaded view is
//! reconciled afterwards.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::cache::{
    CacheEntry, EntityId, FamilyDescriptor, FetchExecutor, FetchFuture, FetchOptions, Fetcher,
    KeyParams, MutationCoordinator, Record, ResourceKey, StoreStats, Subscription, ViewKind,
};
use crate::infra::http::{Transport, WriteMethod};

use super::error::AppError;

#[derive(Clone)]
pub struct ContentService {
    transport: Arc<dyn Transport>,
    coordinator: MutationCoordinator,
    options: FetchOptions,
}

impl ContentService {
    pub fn new(transport: Arc<dyn Transport>, executor: FetchExecutor, options: FetchOptions) -> Self {
        Self {
            transport,
            coordinator: MutationCoordinator::new(executor),
            options,
        }
    }

    pub fn executor(&self) -> &FetchExecutor {
        self.coordinator.executor()
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    pub fn list_key(&self, family: &str, params: KeyParams) -> Result<ResourceKey, AppError> {
        self.supported(family, ViewKind::List)?;
        Ok(ResourceKey::list(family, params))
    }

    pub fn featured_key(&self, family: &str) -> Result<ResourceKey, AppError> {
        self.supported(family, ViewKind::Featured)?;
        Ok(ResourceKey::featured(family))
    }

    pub fn categories_key(&self, family: &str) -> Result<ResourceKey, AppError> {
        self.supported(family, ViewKind::Categories)?;
        Ok(ResourceKey::categories(family))
    }

    pub fn detail_key(
        &self,
        family: &str,
        id: impl Into<EntityId>,
    ) -> Result<ResourceKey, AppError> {
        self.supported(family, ViewKind::Detail)?;
        Ok(ResourceKey::detail(family, id))
    }

    /// Current entry without waiting; starts a background load when the
    /// entry is missing or stale.
    pub fn read(&self, key: &ResourceKey) -> Result<CacheEntry, AppError> {
        let fetcher = self.fetcher(key)?;
        Ok(self.executor().read(key, fetcher, self.options))
    }

    /// Entry once any load it needed has settled.
    pub async fn load(&self, key: &ResourceKey) -> Result<CacheEntry, AppError> {
        let fetcher = self.fetcher(key)?;
        Ok(self.executor().fetch(key, fetcher, self.options).await)
    }

    /// Force a new request for the key.
    pub async fn reload(&self, key: &ResourceKey) -> Result<CacheEntry, AppError> {
        let fetcher = self.fetcher(key)?;
        Ok(self.executor().refetch(key, fetcher, self.options).await)
    }

    pub fn subscribe(&self, key: &ResourceKey) -> Result<Subscription, AppError> {
        let fetcher = self.fetcher(key)?;
        Ok(self.executor().subscribe(key, fetcher, self.options))
    }

    pub async fn list(&self, family: &str, params: KeyParams) -> Result<CacheEntry, AppError> {
        let key = self.list_key(family, params)?;
        self.load(&key).await
    }

    pub async fn featured(&self, family: &str) -> Result<CacheEntry, AppError> {
        let key = self.featured_key(family)?;
        self.load(&key).await
    }

    pub async fn categories(&self, family: &str) -> Result<CacheEntry, AppError> {
        let key = self.categories_key(family)?;
        self.load(&key).await
    }

    pub async fn detail(
        &self,
        family: &str,
        id: impl Into<EntityId>,
    ) -> Result<CacheEntry, AppError> {
        let key = self.detail_key(family, id)?;
        self.load(&key).await
    }

    pub async fn create(&self, family: &str, body: Value) -> Result<Option<Record>, AppError> {
        let descriptor = self.family(family)?;
        let write = self
            .transport
            .write(WriteMethod::Post, descriptor.collection_path(), Some(&body));
        Ok(self.coordinator.create(family, body.clone(), write).await?)
    }

    pub async fn update(
        &self,
        family: &str,
        id: impl Into<EntityId>,
        body: Value,
    ) -> Result<Option<Record>, AppError> {
        let descriptor = self.family(family)?;
        let id = id.into();
        let path = descriptor.item_path(&id);
        let write = self.transport.write(WriteMethod::Put, &path, Some(&body));
        Ok(self.coordinator.update(family, id, body.clone(), write).await?)
    }

    pub async fn delete(&self, family: &str, id: impl Into<EntityId>) -> Result<(), AppError> {
        let descriptor = self.family(family)?;
        let id = id.into();
        let path = descriptor.item_path(&id);
        let write = self.transport.write(WriteMethod::Delete, &path, None);
        self.coordinator.delete(family, id, write).await?;
        Ok(())
    }

    /// Refetch stale views that opted into focus refetching.
    pub fn focus_gained(&self) -> usize {
        self.executor().focus_gained()
    }

    /// Drop everything cached for the current session.
    pub fn sign_out(&self) {
        self.executor().reset_session();
    }

    pub fn shutdown(&self) {
        self.executor().shutdown();
    }

    pub fn stats(&self) -> StoreStats {
        self.executor().store().stats()
    }

    fn family(&self, name: &str) -> Result<Arc<FamilyDescriptor>, AppError> {
        self.executor()
            .store()
            .registry()
            .family(name)
            .ok_or_else(|| AppError::UnknownFamily(name.to_string()))
    }

    fn supported(&self, name: &str, view: ViewKind) -> Result<Arc<FamilyDescriptor>, AppError> {
        let family = self.family(name)?;
        if !family.supports(view) {
            return Err(AppError::UnsupportedView {
                family: name.to_string(),
                view: view.as_str(),
            });
        }
        Ok(family)
    }

    fn fetcher(&self, key: &ResourceKey) -> Result<impl Fetcher + use<>, AppError> {
        let family = self.supported(key.family(), key.view())?;
        let path = family
            .path_for(key)
            .ok_or_else(|| AppError::validation(format!("`{key}` does not name an entity")))?;
        let query = family.query_for(key);
        let transport = Arc::clone(&self.transport);

        Ok(move || -> FetchFuture {
            let transport = Arc::clone(&transport);
            let path = path.clone();
            let query = query.clone();
            async move { transport.read(&path, &query).await }.boxed()
        })
    }
}

//! Consistency of cached views while reads and writes interleave.
//!
//! Reads go through an in-memory backend that counts requests, so each test
//! can assert both what the cache holds and how many network calls it took
//! to get there.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use cms_cache::application::content::ContentService;
use cms_cache::cache::{
    CacheEntry, CacheStore, FetchExecutor, FetchFuture, FetchOptions, FetchStatus, Fetcher,
    KeyParams, KeyPattern, Payload, Record, RemoteError, ResourceKey,
};
use cms_cache::domain::families::{self, ATTRACTIONS, GALLERY, NEWS, PRICING};
use cms_cache::infra::http::{Transport, WriteMethod};

const ATTRACTIONS_PATH: &str = "/api/admin/attractions";

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Default)]
struct MemoryBackend {
    rows: Mutex<Vec<Record>>,
    next_id: AtomicI64,
    reads: AtomicUsize,
}

impl MemoryBackend {
    fn seeded(rows: Vec<Value>) -> Arc<Self> {
        let rows: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        let next_id = rows.iter().filter_map(row_id).max().unwrap_or(0) + 1;
        Arc::new(Self {
            rows: Mutex::new(rows),
            next_id: AtomicI64::new(next_id),
            reads: AtomicUsize::new(0),
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

fn row_id(row: &Record) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

fn item_id(rest: &str) -> Result<i64, RemoteError> {
    rest.trim_start_matches('/')
        .parse()
        .map_err(|_| RemoteError::not_found(format!("no route for `{rest}`")))
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn read(&self, path: &str, params: &KeyParams) -> Result<Payload, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rest = path
            .strip_prefix(ATTRACTIONS_PATH)
            .ok_or_else(|| RemoteError::not_found(path.to_string()))?;
        let rows = self.rows.lock().expect("rows").clone();

        match rest {
            "" => {
                let items = rows
                    .into_iter()
                    .filter(|row| match params.get("category") {
                        Some(expected) => row
                            .get("category")
                            .is_some_and(|value| expected.matches_value(value)),
                        None => true,
                    })
                    .collect();
                Ok(Payload::collection(items))
            }
            "/featured" => Ok(Payload::collection(
                rows.into_iter()
                    .filter(|row| row.get("is_featured") == Some(&Value::Bool(true)))
                    .collect(),
            )),
            "/categories" => {
                let mut names: Vec<String> = rows
                    .iter()
                    .filter_map(|row| row.get("category").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                names.sort();
                names.dedup();
                Payload::from_json(json!(
                    names
                        .into_iter()
                        .map(|name| json!({"id": name, "name": name}))
                        .collect::<Vec<_>>()
                ))
            }
            rest => {
                let id = item_id(rest)?;
                rows.into_iter()
                    .find(|row| row_id(row) == Some(id))
                    .map(Payload::Item)
                    .ok_or_else(|| RemoteError::not_found(format!("attraction {id}")))
            }
        }
    }

    async fn write(
        &self,
        method: WriteMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Record>, RemoteError> {
        let rest = path
            .strip_prefix(ATTRACTIONS_PATH)
            .ok_or_else(|| RemoteError::not_found(path.to_string()))?;
        let fields = body.and_then(Value::as_object).cloned().unwrap_or_default();
        let mut rows = self.rows.lock().expect("rows");

        match method {
            WriteMethod::Post => {
                let mut record = fields;
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                record.insert("id".to_string(), json!(id));
                rows.push(record.clone());
                Ok(Some(record))
            }
            WriteMethod::Put => {
                let id = item_id(rest)?;
                let row = rows
                    .iter_mut()
                    .find(|row| row_id(row) == Some(id))
                    .ok_or_else(|| RemoteError::not_found(format!("attraction {id}")))?;
                row.extend(fields);
                Ok(Some(row.clone()))
            }
            WriteMethod::Delete => {
                let id = item_id(rest)?;
                rows.retain(|row| row_id(row) != Some(id));
                Ok(None)
            }
        }
    }
}

fn attractions() -> Arc<MemoryBackend> {
    MemoryBackend::seeded(vec![
        json!({
            "id": 1,
            "name": "Old Fort",
            "slug": "old-fort",
            "category": "heritage",
            "is_featured": true,
            "description": "Ramparts from the 1700s"
        }),
        json!({
            "id": 2,
            "name": "City Park",
            "slug": "city-park",
            "category": "park",
            "is_featured": false,
            "description": "Lawns and a lake"
        }),
        json!({
            "id": 3,
            "name": "Maritime Museum",
            "slug": "maritime-museum",
            "category": "museum",
            "is_featured": false,
            "description": "Ships and maps"
        }),
    ])
}

fn service(backend: &Arc<MemoryBackend>) -> ContentService {
    let store = Arc::new(CacheStore::new(Arc::new(families::registry())));
    ContentService::new(
        backend.clone(),
        FetchExecutor::new(store),
        FetchOptions::default(),
    )
}

fn items(entry: &CacheEntry) -> Vec<Record> {
    entry
        .payload()
        .and_then(Payload::items)
        .map(<[Record]>::to_vec)
        .unwrap_or_default()
}

fn ids(entry: &CacheEntry) -> Vec<i64> {
    items(entry).iter().filter_map(row_id).collect()
}

fn category(name: &str) -> KeyParams {
    KeyParams::new().with("category", name)
}

// ============================================================================
// Scripted fetchers
// ============================================================================

struct Reply {
    rx: oneshot::Receiver<Result<Payload, RemoteError>>,
    delivered: oneshot::Sender<()>,
}

struct Pending {
    tx: oneshot::Sender<Result<Payload, RemoteError>>,
    delivered: oneshot::Receiver<()>,
}

impl Pending {
    /// Resolve the request and wait until the executor has consumed it.
    async fn deliver(self, result: Result<Payload, RemoteError>) {
        let _ = self.tx.send(result);
        let _ = self.delivered.await;
    }
}

#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl Script {
    fn expect(&self) -> Pending {
        let (tx, rx) = oneshot::channel();
        let (delivered_tx, delivered_rx) = oneshot::channel();
        self.replies.lock().expect("replies").push_back(Reply {
            rx,
            delivered: delivered_tx,
        });
        Pending {
            tx,
            delivered: delivered_rx,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn scripted(script: &Arc<Script>) -> impl Fetcher {
    let script = Arc::clone(script);
    move || -> FetchFuture {
        script.calls.fetch_add(1, Ordering::SeqCst);
        let reply = script.replies.lock().expect("replies").pop_front();
        async move {
            let Some(Reply { rx, delivered }) = reply else {
                return Err(RemoteError::network("unscripted request"));
            };
            let result = rx
                .await
                .unwrap_or_else(|_| Err(RemoteError::network("reply dropped")));
            let _ = delivered.send(());
            result
        }
        .boxed()
    }
}

fn fixed(payload: Value) -> impl Fetcher {
    move || -> FetchFuture {
        let payload = payload.clone();
        async move { Payload::from_json(payload) }.boxed()
    }
}

fn titled(title: &str) -> Payload {
    Payload::from_json(json!([{"id": 1, "title": title}])).expect("payload")
}

fn first_title(entry: &CacheEntry) -> Option<String> {
    items(entry)
        .first()
        .and_then(|item| item.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn executor() -> FetchExecutor {
    FetchExecutor::new(Arc::new(CacheStore::new(Arc::new(families::registry()))))
}

// ============================================================================
// Read de-duplication and ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_of_an_absent_key_issue_one_request() {
    let executor = executor();
    let key = ResourceKey::list(NEWS, KeyParams::new().with("page", 1));
    let calls = Arc::new(AtomicUsize::new(0));

    let readers = (0..16).map(|_| {
        let executor = executor.clone();
        let key = key.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            let fetcher = move || -> FetchFuture {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Payload::from_json(json!([{"id": 1, "title": "Opening hours"}]))
                }
                .boxed()
            };
            executor.fetch(&key, fetcher, FetchOptions::default()).await
        })
    });
    let entries = futures::future::join_all(readers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let expected = executor.entry(&key);
    assert_eq!(expected.status, FetchStatus::Success);
    for entry in entries {
        let entry = entry.expect("reader task");
        assert_eq!(entry.status, FetchStatus::Success);
        assert_eq!(entry.data, expected.data);
    }
}

#[tokio::test]
async fn latest_issued_request_wins_regardless_of_delivery_order() {
    let executor = executor();
    let key = ResourceKey::list(NEWS, KeyParams::new());
    let script = Arc::new(Script::default());
    let first = script.expect();
    let second = script.expect();

    let entry = executor.read(&key, scripted(&script), FetchOptions::default());
    assert!(entry.is_loading());

    let (refetched, ()) = tokio::join!(
        executor.refetch(&key, scripted(&script), FetchOptions::default()),
        async {
            while script.calls() < 2 {
                tokio::task::yield_now().await;
            }
            second.deliver(Ok(titled("B"))).await;
            first.deliver(Ok(titled("A"))).await;
        }
    );

    assert_eq!(script.calls(), 2);
    assert_eq!(first_title(&refetched).as_deref(), Some("B"));
    assert_eq!(first_title(&executor.entry(&key)).as_deref(), Some("B"));
}

#[tokio::test]
async fn writes_supersede_fetches_already_in_flight() {
    let executor = executor();
    let key = ResourceKey::list(NEWS, KeyParams::new());
    let script = Arc::new(Script::default());
    let pending = script.expect();

    executor.read(&key, scripted(&script), FetchOptions::default());
    executor.store().set(&key, titled("written"));
    pending.deliver(Ok(titled("fetched before the write"))).await;

    let entry = executor.entry(&key);
    assert_eq!(entry.status, FetchStatus::Success);
    assert_eq!(first_title(&entry).as_deref(), Some("written"));
}

#[tokio::test]
async fn failed_fetch_keeps_previous_data() {
    let executor = executor();
    let key = ResourceKey::list(NEWS, KeyParams::new());
    executor
        .fetch(&key, fixed(json!([{"id": 1, "title": "Kept"}])), FetchOptions::default())
        .await;

    let script = Arc::new(Script::default());
    let pending = script.expect();
    let (entry, ()) = tokio::join!(
        executor.refetch(&key, scripted(&script), FetchOptions::default()),
        pending.deliver(Err(RemoteError::network("connection reset")))
    );

    assert_eq!(entry.status, FetchStatus::Error);
    assert!(entry.error.is_some());
    assert_eq!(first_title(&entry).as_deref(), Some("Kept"));
}

#[tokio::test]
async fn subscriber_does_not_retry_a_failed_revalidation() {
    let executor = executor();
    let key = ResourceKey::list(NEWS, KeyParams::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let flaky = move || -> FetchFuture {
        let attempt = counted.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Ok(titled("Kept"))
            } else {
                Err(RemoteError::network("connection refused"))
            }
        }
        .boxed()
    };

    let mut subscription = executor.subscribe(&key, flaky, FetchOptions::default());
    while !subscription.current().is_fresh() {
        subscription.next().await.expect("subscription open");
    }
    executor.invalidate(&KeyPattern::family(NEWS));

    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    while let Ok(Some(_)) = tokio::time::timeout_at(deadline, subscription.next()).await {}

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = executor.entry(&key);
    assert_eq!(entry.status, FetchStatus::Error);
    assert_eq!(first_title(&entry).as_deref(), Some("Kept"));
}

// ============================================================================
// Invalidation and session reset
// ============================================================================

#[tokio::test]
async fn invalidating_a_stale_key_again_changes_nothing() {
    let executor = executor();
    let key = ResourceKey::list(GALLERY, KeyParams::new());
    executor
        .fetch(
            &key,
            fixed(json!([{"id": 4, "title": "Sunset"}])),
            FetchOptions::default(),
        )
        .await;

    executor.invalidate(&KeyPattern::family(GALLERY));
    let once = executor.entry(&key);
    executor.invalidate(&KeyPattern::family(GALLERY));
    let twice = executor.entry(&key);

    assert!(once.invalidated);
    assert!(once.is_stale());
    assert_eq!(once, twice);
    assert_eq!(first_title(&twice).as_deref(), Some("Sunset"));
}

#[tokio::test]
async fn per_page_change_only_invalidates_keys_with_the_old_size() {
    let executor = executor();
    let small = ResourceKey::list(NEWS, KeyParams::new().with("per_page", 10));
    let large = ResourceKey::list(NEWS, KeyParams::new().with("per_page", 50));
    for key in [&small, &large] {
        executor
            .fetch(key, fixed(json!([])), FetchOptions::default())
            .await;
    }

    executor.invalidate(&KeyPattern::family(NEWS).with_param("per_page", 10));

    assert!(executor.entry(&small).invalidated);
    assert!(!executor.entry(&large).invalidated);
}

#[tokio::test]
async fn auth_failure_during_a_fetch_clears_every_family() {
    let executor = executor();
    let news = ResourceKey::list(NEWS, KeyParams::new());
    let gallery = ResourceKey::detail(GALLERY, 4);
    executor
        .fetch(&news, fixed(json!([{"id": 1}])), FetchOptions::default())
        .await;
    executor
        .fetch(
            &gallery,
            fixed(json!({"data": {"id": 4}})),
            FetchOptions::default(),
        )
        .await;
    let mut subscription = executor.subscribe(
        &news,
        fixed(json!([{"id": 1}])),
        FetchOptions::default(),
    );

    let script = Arc::new(Script::default());
    let pending = script.expect();
    let pricing = ResourceKey::list(PRICING, KeyParams::new());
    executor.read(&pricing, scripted(&script), FetchOptions::default());
    pending
        .deliver(Err(RemoteError::auth("token expired")))
        .await;

    assert!(executor.store().is_empty());
    assert_eq!(executor.inflight_count(), 0);
    for key in [&news, &gallery, &pricing] {
        let entry = executor.entry(key);
        assert_eq!(entry.status, FetchStatus::Idle);
        assert!(entry.data.is_none());
    }
    assert!(subscription.next().await.is_none());
}

// ============================================================================
// Mutation post-conditions
// ============================================================================

#[tokio::test]
async fn create_appends_the_summary_once_to_every_matching_list() {
    let backend = attractions();
    let service = service(&backend);
    let all = service
        .list_key(ATTRACTIONS, KeyParams::new())
        .expect("key");
    let paged = service
        .list_key(
            ATTRACTIONS,
            KeyParams::new().with("page", 1).with("per_page", 10),
        )
        .expect("key");
    let museums = service
        .list_key(ATTRACTIONS, category("museum"))
        .expect("key");
    let parks = service.list_key(ATTRACTIONS, category("park")).expect("key");
    let featured = service.featured_key(ATTRACTIONS).expect("key");
    for key in [&all, &paged, &museums, &parks, &featured] {
        service.load(key).await.expect("load");
    }
    let reads = backend.reads();

    let created = service
        .create(
            ATTRACTIONS,
            json!({
                "name": "Science Museum",
                "slug": "science-museum",
                "category": "museum",
                "description": "Hands-on exhibits"
            }),
        )
        .await
        .expect("create")
        .expect("created entity");
    let id = row_id(&created).expect("id");

    for key in [&all, &paged, &museums] {
        let entry = service.read(key).expect("read");
        assert_eq!(
            ids(&entry).iter().filter(|item| **item == id).count(),
            1,
            "{key} should list the new attraction once"
        );
    }
    assert!(!ids(&service.read(&parks).expect("read")).contains(&id));
    assert!(service.executor().entry(&featured).invalidated);
    assert_eq!(backend.reads(), reads);

    let summary = items(&service.read(&all).expect("read"))
        .into_iter()
        .find(|item| row_id(item) == Some(id))
        .expect("summary");
    assert_eq!(summary.get("description"), None);
    assert_eq!(summary.get("thumbnail_url"), Some(&Value::Null));
    assert_eq!(summary.get("name"), Some(&json!("Science Museum")));
}

#[tokio::test]
async fn update_keeps_detail_and_lists_in_agreement() {
    let backend = attractions();
    let service = service(&backend);
    let all = service
        .list_key(ATTRACTIONS, KeyParams::new())
        .expect("key");
    let museums = service
        .list_key(ATTRACTIONS, category("museum"))
        .expect("key");
    let detail = service.detail_key(ATTRACTIONS, 3).expect("key");
    for key in [&all, &museums, &detail] {
        service.load(key).await.expect("load");
    }
    let reads = backend.reads();

    service
        .update(
            ATTRACTIONS,
            3,
            json!({"name": "Harbour Museum", "is_featured": true}),
        )
        .await
        .expect("update");

    let detail_entry = service.read(&detail).expect("read");
    let full = detail_entry
        .payload()
        .and_then(Payload::as_item)
        .cloned()
        .expect("detail");
    assert_eq!(full.get("name"), Some(&json!("Harbour Museum")));
    assert_eq!(full.get("description"), Some(&json!("Ships and maps")));

    for key in [&all, &museums] {
        let summary = items(&service.read(key).expect("read"))
            .into_iter()
            .find(|item| row_id(item) == Some(3))
            .expect("listed");
        for (field, value) in &summary {
            if let Some(detail_value) = full.get(field) {
                assert_eq!(value, detail_value, "{key} disagrees on `{field}`");
            }
        }
    }
    assert_eq!(backend.reads(), reads);
}

#[tokio::test]
async fn update_moves_an_item_between_filtered_lists() {
    let backend = attractions();
    let service = service(&backend);
    let museums = service
        .list_key(ATTRACTIONS, category("museum"))
        .expect("key");
    let parks = service.list_key(ATTRACTIONS, category("park")).expect("key");
    for key in [&museums, &parks] {
        service.load(key).await.expect("load");
    }

    service
        .update(ATTRACTIONS, 3, json!({"category": "park"}))
        .await
        .expect("update");

    assert!(!ids(&service.executor().entry(&museums)).contains(&3));
    let parks_entry = service.executor().entry(&parks);
    assert!(parks_entry.invalidated);

    let reloaded = service.load(&parks).await.expect("reload");
    assert!(ids(&reloaded).contains(&3));
}

#[tokio::test]
async fn delete_removes_the_entity_from_lists_and_detail() {
    let backend = attractions();
    let service = service(&backend);
    let all = service
        .list_key(ATTRACTIONS, KeyParams::new())
        .expect("key");
    let heritage = service
        .list_key(ATTRACTIONS, category("heritage"))
        .expect("key");
    let detail = service.detail_key(ATTRACTIONS, 1).expect("key");
    for key in [&all, &heritage, &detail] {
        service.load(key).await.expect("load");
    }

    service.delete(ATTRACTIONS, 1).await.expect("delete");

    for key in [&all, &heritage] {
        assert!(!ids(&service.executor().entry(key)).contains(&1));
    }
    assert!(service.executor().store().get(&detail).is_none());
}

#[tokio::test]
async fn failed_write_leaves_the_cache_untouched() {
    let backend = attractions();
    let service = service(&backend);
    let all = service
        .list_key(ATTRACTIONS, KeyParams::new())
        .expect("key");
    let before = service.load(&all).await.expect("load");

    let result = service
        .update(ATTRACTIONS, 99, json!({"name": "Nowhere"}))
        .await;

    assert!(result.is_err());
    assert_eq!(service.executor().entry(&all), before);
}

#[tokio::test]
async fn created_item_is_served_from_cache_without_refetching() {
    let backend = MemoryBackend::seeded(Vec::new());
    let service = service(&backend);
    let items_key = service
        .list_key(ATTRACTIONS, KeyParams::new())
        .expect("key");

    let empty = service.load(&items_key).await.expect("load");
    assert!(ids(&empty).is_empty());
    assert_eq!(backend.reads(), 1);

    service
        .create(ATTRACTIONS, json!({"name": "A"}))
        .await
        .expect("create");

    let entry = service.read(&items_key).expect("read");
    let listed = items(&entry);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(&json!(1)));
    assert_eq!(listed[0].get("name"), Some(&json!("A")));
    assert_eq!(backend.reads(), 1);
}

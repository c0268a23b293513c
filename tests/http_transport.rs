use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use serde_json::json;
use url::Url;

use cms_cache::application::content::ContentService;
use cms_cache::cache::{
    CacheStore, ErrorKind, FetchExecutor, FetchOptions, FetchStatus, KeyParams, Payload,
    RemoteError,
};
use cms_cache::domain::families::{self, NEWS};
use cms_cache::infra::http::{RestTransport, Transport, WriteMethod};

fn transport(server: &MockServer, token: Option<&str>) -> RestTransport {
    let base = Url::parse(&server.base_url()).expect("base url");
    RestTransport::new(base, token.map(str::to_string), Duration::from_secs(5))
        .expect("transport")
}

#[tokio::test]
async fn list_reads_send_key_params_and_bearer_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/api/admin/news")
            .query_param("page", "2")
            .query_param("per_page", "10")
            .header("authorization", "Bearer secret");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"data":[{"id":11,"title":"Ferry timetable"}],"meta":{"total":12}}"#);
    });

    let payload = transport(&server, Some("secret"))
        .read(
            "/api/admin/news",
            &KeyParams::new().with("page", 2).with("per_page", 10),
        )
        .await
        .expect("payload");

    mock.assert();
    assert_eq!(payload.len(), 1);
    assert_eq!(payload.meta(), Some(&json!({"total": 12})));
}

#[tokio::test]
async fn bare_objects_become_items() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/admin/profile/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":1,"name":"Coastal Tourism Board"}"#);
    });

    let payload = transport(&server, None)
        .read("/api/admin/profile/1", &KeyParams::new())
        .await
        .expect("payload");

    let item = payload.as_item().expect("item");
    assert_eq!(item.get("name"), Some(&json!("Coastal Tourism Board")));
}

#[tokio::test]
async fn failure_statuses_map_onto_error_kinds() {
    let server = MockServer::start();
    for (path, status, body) in [
        ("/api/admin/news/unauthorized", 401, r#"{"message":"Unauthenticated."}"#),
        ("/api/admin/news/missing", 404, ""),
        ("/api/admin/news/invalid", 422, r#"{"message":"The title field is required."}"#),
        ("/api/admin/news/broken", 500, "upstream exploded"),
    ] {
        server.mock(|when, then| {
            when.method("GET").path(path);
            then.status(status).body(body);
        });
    }
    let transport = transport(&server, None);

    assert_eq!(
        read_error(&transport, "/api/admin/news/unauthorized").await.kind(),
        ErrorKind::Auth
    );
    assert_eq!(
        read_error(&transport, "/api/admin/news/missing").await.kind(),
        ErrorKind::NotFound
    );
    let invalid = read_error(&transport, "/api/admin/news/invalid").await;
    assert_eq!(invalid.kind(), ErrorKind::Validation);
    assert!(invalid.message().contains("The title field is required."));
    assert_eq!(
        read_error(&transport, "/api/admin/news/broken").await.kind(),
        ErrorKind::Network
    );
}

async fn read_error(transport: &RestTransport, path: &str) -> RemoteError {
    transport
        .read(path, &KeyParams::new())
        .await
        .expect_err("failure status")
}

#[tokio::test]
async fn unparseable_bodies_are_unexpected_shapes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/admin/news");
        then.status(200)
            .header("content-type", "application/json")
            .body("<html>maintenance</html>");
    });

    let error = transport(&server, None)
        .read("/api/admin/news", &KeyParams::new())
        .await
        .expect_err("not json");

    assert_eq!(error.kind(), ErrorKind::UnexpectedShape);
}

#[tokio::test]
async fn writes_send_json_and_unwrap_the_entity() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method("POST")
            .path("/api/admin/news")
            .json_body_includes(r#"{"title":"Harbour festival"}"#);
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"success":true,"data":{"id":31,"title":"Harbour festival"}}"#);
    });
    let delete = server.mock(|when, then| {
        when.method("DELETE").path("/api/admin/news/31");
        then.status(204);
    });
    let transport = transport(&server, None);

    let created = transport
        .write(
            WriteMethod::Post,
            "/api/admin/news",
            Some(&json!({"title": "Harbour festival"})),
        )
        .await
        .expect("create")
        .expect("entity");
    let deleted = transport
        .write(WriteMethod::Delete, "/api/admin/news/31", None)
        .await
        .expect("delete");

    create.assert();
    delete.assert();
    assert_eq!(created.get("id"), Some(&json!(31)));
    assert_eq!(deleted, None);
}

#[tokio::test]
async fn cached_list_absorbs_a_create_without_another_request() {
    let server = MockServer::start();
    let list = server.mock(|when, then| {
        when.method("GET").path("/api/admin/news");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"data":[],"meta":{"total":0}}"#);
    });
    let create = server.mock(|when, then| {
        when.method("POST").path("/api/admin/news");
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"data":{"id":1,"title":"A","body":"Long text"}}"#);
    });

    let store = Arc::new(CacheStore::new(Arc::new(families::registry())));
    let service = ContentService::new(
        Arc::new(transport(&server, None)),
        FetchExecutor::new(store),
        FetchOptions::default(),
    );

    let empty = service.list(NEWS, KeyParams::new()).await.expect("list");
    assert_eq!(empty.status, FetchStatus::Success);
    service
        .create(NEWS, json!({"title": "A", "body": "Long text"}))
        .await
        .expect("create");
    let entry = service.list(NEWS, KeyParams::new()).await.expect("list");

    list.assert();
    create.assert();
    let items = entry.payload().and_then(Payload::items).expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("title"), Some(&json!("A")));
    assert_eq!(items[0].get("body"), None);
    assert_eq!(entry.payload().and_then(Payload::meta), Some(&json!({"total": 0})));
}

#[tokio::test]
async fn unreadable_create_response_still_invalidates_cached_lists() {
    let server = MockServer::start();
    let list = server.mock(|when, then| {
        when.method("GET").path("/api/admin/news");
        then.status(200)
            .header("content-type", "application/json")
            .body("[]");
    });
    let create = server.mock(|when, then| {
        when.method("POST").path("/api/admin/news");
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"[{"id":1,"title":"A"}]"#);
    });

    let store = Arc::new(CacheStore::new(Arc::new(families::registry())));
    let service = ContentService::new(
        Arc::new(transport(&server, None)),
        FetchExecutor::new(store),
        FetchOptions::default(),
    );
    let key = service.list_key(NEWS, KeyParams::new()).expect("key");

    service.load(&key).await.expect("list");
    let written = service
        .create(NEWS, json!({"title": "A"}))
        .await
        .expect("write committed");

    list.assert_calls(1);
    create.assert();
    assert_eq!(written, None);
    let entry = service.executor().entry(&key);
    assert!(entry.invalidated);
    assert!(!entry.is_fresh());
}

//! REST adapter against a mock resource server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use modelsync::adapter::{Adapter, AdapterError, ResourceMapping, RestAdapter};
use modelsync::schema::ModelType;
use modelsync::store::Store;
use serde_json::json;

fn photo() -> ModelType {
    ModelType::new("photo")
}

#[tokio::test]
async fn test_fetch_uses_namespace_and_plural_path() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(r#"{"photo": {"id": 1, "title": "A"}}"#))
        .await;
    let adapter = RestAdapter::builder(backend.base_url())
        .namespace("api/v1")
        .build()
        .unwrap();

    let doc = adapter.fetch(&photo(), "1").await.unwrap();
    assert_eq!(doc["photo"]["title"], json!("A"));

    let requests = backend.captured_requests().await;
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/api/v1/photos/1");
}

#[tokio::test]
async fn test_resource_name_overrides() {
    let backend = MockBackend::start().await;
    backend.enqueue_response(MockResponse::json("[]")).await;
    let adapter = RestAdapter::builder(backend.base_url())
        .mapping(ResourceMapping::new().with_override("person", "person", "people"))
        .build()
        .unwrap();

    adapter.fetch_all(&ModelType::new("person")).await.unwrap();
    adapter.fetch_all(&ModelType::new("blogPost")).await.unwrap();

    let paths: Vec<String> = backend
        .captured_requests()
        .await
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(paths, vec!["/people", "/blog_posts"]);
}

#[tokio::test]
async fn test_status_mapping() {
    let backend = MockBackend::start().await;
    backend.enqueue_response(MockResponse::error(404, "missing")).await;
    backend.enqueue_response(MockResponse::error(500, "boom")).await;
    backend
        .enqueue_response(MockResponse::validation(r#"{"url": ["is invalid"]}"#))
        .await;
    let adapter = RestAdapter::builder(backend.base_url()).build().unwrap();

    let err = adapter.fetch(&photo(), "9").await.unwrap_err();
    assert_eq!(
        err,
        AdapterError::NotFound {
            model: "photo".to_string(),
            id: "9".to_string()
        }
    );

    let err = adapter.fetch_all(&photo()).await.unwrap_err();
    match err {
        AdapterError::Http { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("expected Http error, got {:?}", other),
    }

    let err = adapter
        .create(&photo(), json!({"url": "nope"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert_eq!(err.field_errors().unwrap()["url"], vec!["is invalid".to_string()]);
}

#[tokio::test]
async fn test_unreachable_server_is_network_failure() {
    // Bind and drop a listener to get a port nobody is serving.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let adapter = RestAdapter::builder(format!("http://127.0.0.1:{}", port))
        .connect_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let err = adapter.fetch(&photo(), "1").await.unwrap_err();
    assert!(matches!(err, AdapterError::NetworkFailure(_)));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json("{}").with_delay(500))
        .await;
    let adapter = RestAdapter::builder(backend.base_url())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = adapter.fetch(&photo(), "1").await.unwrap_err();
    match err {
        AdapterError::NetworkFailure(message) => assert!(message.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_root_envelope_wraps_write_bodies() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(r#"{"photo": {"id": 5}}"#).with_status(201))
        .await;
    let adapter = RestAdapter::builder(backend.base_url())
        .root_envelope(true)
        .build()
        .unwrap();

    adapter.create(&photo(), json!({"title": "A"})).await.unwrap();
    let requests = backend.captured_requests().await;
    assert_eq!(requests[0].json(), json!({"photo": {"title": "A"}}));
}

#[tokio::test]
async fn test_bulk_endpoints() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(r#"{"photos": [{"id": 1}, {"id": 2}]}"#))
        .await;
    backend.enqueue_response(MockResponse::empty(204)).await;
    backend.enqueue_response(MockResponse::empty(204)).await;
    let adapter = RestAdapter::builder(backend.base_url())
        .bulk_commit(true)
        .build()
        .unwrap();

    let created = adapter
        .create_many(&photo(), vec![json!({"title": "a"}), json!({"title": "b"})])
        .await
        .unwrap();
    assert_eq!(created, vec![json!({"id": 1}), json!({"id": 2})]);

    let updated = adapter
        .update_many(&photo(), vec![("1".to_string(), json!({"title": "c"}))])
        .await
        .unwrap();
    assert_eq!(updated, vec![json!(null)]);

    adapter
        .delete_many(&photo(), vec!["1".to_string(), "2".to_string()])
        .await
        .unwrap();

    let requests = backend.captured_requests().await;
    assert_eq!(requests.len(), 3);
    assert_eq!((requests[0].method.as_str(), requests[0].path.as_str()), ("POST", "/photos"));
    assert_eq!(requests[1].json(), json!([{"id": 1, "title": "c"}]));
    assert_eq!(requests[2].method, "DELETE");
    assert_eq!(requests[2].json(), json!([1, 2]));
}

#[tokio::test]
async fn test_store_loads_sideloaded_payload() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(
            r#"{
                "photo": {"id": 1, "title": "A"},
                "comments": [
                    {"id": 10, "text": "nice", "photo_id": 1},
                    {"id": 11, "text": "great", "photo_id": 1}
                ]
            }"#,
        ))
        .await;
    let adapter = RestAdapter::builder(backend.base_url()).build().unwrap();
    let store = Store::new(photoblog_registry(), Arc::new(adapter));

    let photo = store.find_loaded("photo", "1").await.unwrap();
    let comments = store.resolve_has_many(&photo, "comments").unwrap();
    let texts: Vec<String> = comments
        .records()
        .iter()
        .filter_map(|c| c.get_str("text"))
        .collect();
    assert_eq!(texts, vec!["nice", "great"]);
    assert_eq!(backend.captured_requests().await.len(), 1);
}

#[tokio::test]
async fn test_member_ids_are_path_encoded() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(r#"{"photo": {"id": "a/b"}}"#))
        .await;
    backend.enqueue_response(MockResponse::empty(204)).await;
    let adapter = RestAdapter::builder(backend.base_url()).build().unwrap();

    adapter.fetch(&photo(), "a/b").await.unwrap();
    adapter.delete(&photo(), "x?y").await.unwrap();

    let requests = backend.captured_requests().await;
    assert_eq!(requests[0].path, "/photos/a%2Fb");
    assert_eq!(requests[1].path, "/photos/x%3Fy");
}

#[tokio::test]
async fn test_leading_zero_ids_survive_writes() {
    let backend = MockBackend::start().await;
    backend
        .enqueue_response(MockResponse::json(r#"{"comment": {"id": "9", "text": "hi", "photo_id": "007"}}"#))
        .await;
    backend.enqueue_response(MockResponse::empty(204)).await;
    let store = rest_store(&backend);

    let comment = store.find_loaded("comment", "9").await.unwrap();
    store.set_attribute(&comment, "text", "edited").unwrap();
    store.commit(&comment).await.unwrap();

    let requests = backend.captured_requests().await;
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(requests[1].json()["photo_id"], json!("007"));
}

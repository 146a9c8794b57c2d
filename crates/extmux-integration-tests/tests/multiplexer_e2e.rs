//! Multiplexer in front of per-tenant extension instances, over real HTTP

mod common;

use axum::http::StatusCode;
use common::{
    Behavior, FRONT_SECRET, Harness, config_validation, event, init_tracing, post, post_signed,
    request,
};
use extmux_core::{Message, PROTOCOL_VERSION, SchemaResponse};
use extmux_directory::{DirectoryStore, FileDirectoryStore, MemoryDirectoryStore};
use serde_json::json;
use std::sync::Arc;

async fn subscribed(harness: &Harness, store: Arc<dyn DirectoryStore>, tenant: &str) -> axum::Router {
    let front = harness.front(store);
    let (status, _) = post(&front, &event(tenant, "subscribe", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    front
}

#[tokio::test]
async fn test_schema_comes_from_reference_instance() {
    init_tracing();
    let harness = Harness::start(Behavior::default()).await;
    let front = harness.front(Arc::new(MemoryDirectoryStore::new()));

    let (status, response) = post(&front, &Message::schema_request(PROTOCOL_VERSION)).await;
    assert_eq!(status, StatusCode::OK);

    let schema: SchemaResponse = serde_json::from_value(response.unwrap().data.unwrap()).unwrap();
    assert_eq!(schema.actions().collect::<Vec<_>>(), vec!["flaky", "scan"]);
    assert_eq!(
        schema.required_events,
        vec!["detection", "subscribe", "unsubscribe"]
    );
    assert_eq!(schema.views, vec![json!({"name": "main"})]);
    assert!(harness.provisioner.log().is_empty());
}

#[tokio::test]
async fn test_tenant_lifecycle() {
    let harness = Harness::start(Behavior::default()).await;
    let store = Arc::new(MemoryDirectoryStore::new());
    let front = subscribed(&harness, store.clone(), "abc").await;

    let entry = store.get("abc").await.unwrap().unwrap();
    assert_eq!(
        Some(entry.secret.clone()),
        harness.provisioner.secret_of("abc")
    );
    assert_ne!(entry.secret, FRONT_SECRET);
    assert_eq!(
        harness.provisioner.log(),
        vec!["create:abc", "make_reachable:abc"]
    );

    let (status, response) = post(&front, &request("abc", "scan", json!({"target": "host-1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let response = response.unwrap();
    assert_eq!(response.version, PROTOCOL_VERSION);
    assert_eq!(
        response.data,
        Some(json!({
            "tenant": "abc",
            "served_by": "scanner-abc",
            "target": "host-1",
            "idempotency_key": "idem-scan"
        }))
    );
    assert_eq!(response.continuations.len(), 1);
    assert_eq!(response.continuations[0].action, "scan");
    assert_eq!(response.continuations[0].delay_seconds, 30);
    assert_eq!(response.continuations[0].state["target"], "host-1");

    let (status, response) =
        post(&front, &event("abc", "detection", json!({"rule": "r1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.unwrap().data, Some(json!({"rule": "r1"})));

    let (status, _) = post(&front, &event("abc", "unsubscribe", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(store.is_empty().await);
    assert_eq!(harness.provisioner.running(), 0);
    assert_eq!(harness.provisioner.log().last().unwrap(), "destroy:abc");

    let (status, response) = post(&front, &request("abc", "scan", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.unwrap().error,
        "failed to get service: no instance registered for tenant abc"
    );
}

#[tokio::test]
async fn test_tenants_get_their_own_instance() {
    let harness = Harness::start(Behavior::default()).await;
    let store = Arc::new(MemoryDirectoryStore::new());
    let front = subscribed(&harness, store.clone(), "abc").await;
    let (status, _) = post(&front, &event("def", "subscribe", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(harness.provisioner.running(), 2);
    assert_ne!(
        harness.provisioner.secret_of("abc"),
        harness.provisioner.secret_of("def")
    );

    for tenant in ["abc", "def"] {
        let (_, response) = post(&front, &request(tenant, "scan", json!({}))).await;
        assert_eq!(
            response.unwrap().data.unwrap()["served_by"],
            format!("scanner-{}", tenant)
        );
    }
}

#[tokio::test]
async fn test_rejected_subscribe_removes_instance() {
    let harness = Harness::start(Behavior {
        reject_subscribe: true,
    })
    .await;
    let store = Arc::new(MemoryDirectoryStore::new());
    let front = harness.front(store.clone());

    let (status, response) = post(&front, &event("abc", "subscribe", json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.unwrap().error, "quota exceeded");

    assert!(store.is_empty().await);
    assert_eq!(harness.provisioner.running(), 0);
    assert_eq!(
        harness.provisioner.log(),
        vec!["create:abc", "make_reachable:abc", "destroy:abc"]
    );
}

#[tokio::test]
async fn test_repeated_subscribe_keeps_existing_instance() {
    let harness = Harness::start(Behavior::default()).await;
    let store = Arc::new(MemoryDirectoryStore::new());
    let front = subscribed(&harness, store.clone(), "abc").await;
    let secret = store.get("abc").await.unwrap().unwrap().secret;

    let (status, _) = post(&front, &event("abc", "subscribe", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(harness.provisioner.running(), 1);
    assert_eq!(store.get("abc").await.unwrap().unwrap().secret, secret);
}

#[tokio::test]
async fn test_retriable_instance_error_propagates() {
    let harness = Harness::start(Behavior::default()).await;
    let front = subscribed(&harness, Arc::new(MemoryDirectoryStore::new()), "abc").await;

    let (status, response) = post(&front, &request("abc", "flaky", json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.unwrap().error, "busy");
}

#[tokio::test]
async fn test_config_validation_reaches_instance() {
    let harness = Harness::start(Behavior::default()).await;
    let front = subscribed(&harness, Arc::new(MemoryDirectoryStore::new()), "abc").await;

    let (status, response) = post(&front, &config_validation("abc", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.unwrap().error, "api_key is required");

    let (status, _) = post(&front, &config_validation("abc", json!({"api_key": "k"}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_bad_signature_never_provisions() {
    let harness = Harness::start(Behavior::default()).await;
    let store = Arc::new(MemoryDirectoryStore::new());
    let front = harness.front(store.clone());

    let (status, response) =
        post_signed(&front, "wrong-secret", &event("abc", "subscribe", json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(response.is_none());
    assert!(harness.provisioner.log().is_empty());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_file_directory_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("directory.json");
    let harness = Harness::start(Behavior::default()).await;

    let store = Arc::new(FileDirectoryStore::new(&path).await.unwrap());
    subscribed(&harness, store, "abc").await;

    // A new front with a cold cache finds the instance on disk
    let restarted = harness.front(Arc::new(FileDirectoryStore::new(&path).await.unwrap()));
    let (status, response) = post(&restarted, &request("abc", "scan", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.unwrap().data.unwrap()["served_by"], "scanner-abc");
    assert_eq!(harness.provisioner.running(), 1);
}

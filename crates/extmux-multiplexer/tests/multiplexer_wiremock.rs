//! Multiplexer forwarding and lifecycle against a mocked tenant instance

use async_trait::async_trait;
use extmux_core::{Dict, Message, PROTOCOL_VERSION, Response, TenantAccess, verify};
use extmux_directory::{DirectoryEntry, DirectoryStore, MemoryDirectoryStore, ServiceDirectory};
use extmux_egress::{Forwarder, HttpClientConfig};
use extmux_ingress::{EventParams, RequestParams, TenantClient};
use extmux_multiplexer::{MessageHook, MultiplexError, Multiplexer, fetch_reference_schema};
use extmux_provision::{InstanceProvisioner, ProvisionError, ServiceDefinition};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{body_partial_json, method},
};

struct SignedWith(String);

impl wiremock::Match for SignedWith {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get("lc-ext-sig")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|sig| verify(&request.body, sig, self.0.as_bytes()))
    }
}

/// Hands out one fixed address and remembers the secret it was given.
struct FixedProvisioner {
    address: String,
    instances: Mutex<HashSet<String>>,
    secrets: Mutex<HashMap<String, String>>,
}

impl FixedProvisioner {
    fn new(address: String) -> Self {
        Self {
            address,
            instances: Mutex::default(),
            secrets: Mutex::default(),
        }
    }
}

#[async_trait]
impl InstanceProvisioner for FixedProvisioner {
    async fn create(
        &self,
        tenant_id: &str,
        _definition: &ServiceDefinition,
        secret: &str,
    ) -> extmux_provision::Result<String> {
        self.instances.lock().unwrap().insert(tenant_id.to_string());
        self.secrets
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), secret.to_string());
        Ok(self.address.clone())
    }

    async fn make_reachable(&self, _tenant_id: &str, _address: &str) -> extmux_provision::Result<()> {
        Ok(())
    }

    async fn destroy(&self, tenant_id: &str) -> extmux_provision::Result<()> {
        if self.instances.lock().unwrap().remove(tenant_id) {
            Ok(())
        } else {
            Err(ProvisionError::NotFound(tenant_id.to_string()))
        }
    }
}

struct Fixture {
    mux: Arc<Multiplexer>,
    store: Arc<MemoryDirectoryStore>,
    provisioner: Arc<FixedProvisioner>,
}

fn forwarder() -> Forwarder {
    Forwarder::new(&HttpClientConfig {
        timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

fn fixture(server: &MockServer) -> Fixture {
    let store = Arc::new(MemoryDirectoryStore::new());
    let provisioner = Arc::new(FixedProvisioner::new(server.uri()));
    let definition = ServiceDefinition {
        image: "registry.example.com/scanner:1".to_string(),
        ..Default::default()
    };
    let directory = ServiceDirectory::new(store.clone(), provisioner.clone(), definition);
    Fixture {
        mux: Arc::new(Multiplexer::new(directory, forwarder())),
        store,
        provisioner,
    }
}

async fn register(f: &Fixture, server: &MockServer, secret: &str) {
    f.store
        .put(&DirectoryEntry::new("abc", server.uri(), secret))
        .await
        .unwrap();
}

fn client() -> TenantClient {
    TenantClient::new(TenantAccess::new("abc", "tenant-jwt").with_ident("user@example.com"))
}

fn request(action: &str, data: serde_json::Value) -> RequestParams<Dict> {
    RequestParams {
        client: client(),
        action: action.to_string(),
        request: data.as_object().cloned().unwrap_or_default(),
        config: Dict::new(),
        idempotency_key: "idem-1".to_string(),
        resource_state: HashMap::new(),
        investigation_id: Some("inv-7".to_string()),
    }
}

fn event(name: &str) -> EventParams {
    EventParams {
        client: client(),
        event_name: name.to_string(),
        data: Dict::new(),
        config: Dict::new(),
        idempotency_key: "idem-2".to_string(),
    }
}

fn ok_body(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "error": "",
        "version": PROTOCOL_VERSION,
        "data": data
    }))
}

#[tokio::test]
async fn test_request_is_resigned_and_forwarded() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "instance-secret").await;

    Mock::given(method("POST"))
        .and(SignedWith("instance-secret".to_string()))
        .and(body_partial_json(json!({
            "version": PROTOCOL_VERSION,
            "idempotency_key": "idem-1",
            "request": {
                "org": {"oid": "abc", "jwt": "tenant-jwt", "ident": "user@example.com"},
                "action": "scan",
                "data": {"sensor": "s1"},
                "inv_id": "inv-7"
            }
        })))
        .respond_with(ok_body(json!({"scanned": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let response = f
        .mux
        .forward_request(request("scan", json!({"sensor": "s1"})))
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!({"scanned": 1})));
}

#[tokio::test]
async fn test_unknown_tenant_is_not_retriable() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    let err = f
        .mux
        .forward_request(request("scan", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, MultiplexError::Directory(ref e) if e.is_not_found()));
    assert!(!err.is_retriable());
}

struct TaggingHook;

#[async_trait]
impl MessageHook for TaggingHook {
    async fn on_send(
        &self,
        _tenant: &TenantAccess,
        mut message: Message,
    ) -> extmux_multiplexer::Result<Message> {
        if let Some(request) = message.request.as_mut() {
            request.data.insert("tagged".to_string(), json!(true));
        }
        Ok(message)
    }

    async fn on_response(
        &self,
        tenant: &TenantAccess,
        _message: &Message,
        mut response: Response,
        started_at: Instant,
    ) -> extmux_multiplexer::Result<Response> {
        assert!(started_at.elapsed().as_secs() < 5);
        response.data = Some(json!({"seen_by": tenant.id}));
        Ok(response)
    }
}

#[tokio::test]
async fn test_hooks_rewrite_both_directions() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"request": {"data": {"tagged": true}}})))
        .respond_with(ok_body(json!({"original": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mux = Multiplexer::new(f.mux.directory().clone(), forwarder()).with_hook(Arc::new(TaggingHook));
    let response = mux.forward_request(request("scan", json!({}))).await.unwrap();
    assert_eq!(response.data, Some(json!({"seen_by": "abc"})));
}

struct RejectingHook;

#[async_trait]
impl MessageHook for RejectingHook {
    async fn on_send(
        &self,
        _tenant: &TenantAccess,
        _message: Message,
    ) -> extmux_multiplexer::Result<Message> {
        Err(MultiplexError::hook("policy denied"))
    }
}

#[tokio::test]
async fn test_hook_failure_aborts_forward() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;

    Mock::given(method("POST"))
        .respond_with(ok_body(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let mux = Multiplexer::new(f.mux.directory().clone(), forwarder())
        .with_hook(Arc::new(RejectingHook));
    let err = mux.forward_request(request("scan", json!({}))).await.unwrap_err();
    assert!(err.to_string().contains("policy denied"));
}

#[tokio::test]
async fn test_subscribe_provisions_then_forwards() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"event": {"event_name": "subscribe"}})))
        .respond_with(ok_body(json!({"welcome": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = f.mux.forward_event(event("subscribe")).await.unwrap();
    assert!(!response.is_error());

    let entry = f.mux.directory().resolve("abc").await.unwrap();
    let secret = f.provisioner.secrets.lock().unwrap()["abc"].clone();
    assert_eq!(entry.secret, secret);

    // The subscribe itself was signed with the fresh instance secret
    let received = server.received_requests().await.unwrap();
    let sig = received[0].headers.get("lc-ext-sig").unwrap().to_str().unwrap();
    assert!(verify(&received[0].body, sig, secret.as_bytes()));
}

#[tokio::test]
async fn test_rejected_subscribe_tears_instance_down() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "bootstrap failed",
            "version": PROTOCOL_VERSION
        })))
        .mount(&server)
        .await;

    let response = f.mux.forward_event(event("subscribe")).await.unwrap();
    assert_eq!(response.error, "bootstrap failed");
    assert!(response.is_retriable());

    assert!(f.mux.directory().resolve("abc").await.unwrap_err().is_not_found());
    assert!(f.provisioner.instances.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_undeliverable_subscribe_tears_instance_down() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = f.mux.forward_event(event("subscribe")).await.unwrap_err();
    assert!(matches!(err, MultiplexError::Forward(_)));
    assert!(f.mux.directory().resolve("abc").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unsubscribe_always_deprovisions() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;
    f.provisioner.instances.lock().unwrap().insert("abc".to_string());

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"event": {"event_name": "unsubscribe"}})))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "busy",
            "version": PROTOCOL_VERSION
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = f.mux.forward_event(event("unsubscribe")).await.unwrap();
    assert_eq!(response.error, "busy");
    assert!(!response.is_retriable());

    assert!(f.mux.directory().resolve("abc").await.unwrap_err().is_not_found());
    assert!(f.provisioner.instances.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_transport_failure_is_fatal() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = f.mux.forward_event(event("unsubscribe")).await.unwrap_err();
    assert!(matches!(err, MultiplexError::Fatal(_)));
    assert!(!err.is_retriable());
    assert!(f.store.is_empty().await);
}

#[tokio::test]
async fn test_other_events_have_no_lifecycle_effect() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"event": {"event_name": "detection"}})))
        .respond_with(ok_body(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    f.mux.forward_event(event("detection")).await.unwrap();
    assert!(f.mux.directory().resolve("abc").await.is_ok());
}

#[tokio::test]
async fn test_config_validation_is_forwarded() {
    let server = MockServer::start().await;
    let f = fixture(&server);
    register(&f, &server, "s").await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "idempotency_key": "",
            "conf_validation": {"org": {"oid": "abc"}, "conf": {"level": 3}}
        })))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "level too high",
            "version": PROTOCOL_VERSION
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = json!({"level": 3}).as_object().cloned().unwrap();
    let response = f
        .mux
        .forward_config_validation(&client(), config)
        .await
        .unwrap();
    assert_eq!(response.error, "level too high");
    assert!(!response.is_retriable());
}

#[tokio::test]
async fn test_registry_from_reference_schema() {
    let server = MockServer::start().await;
    let f = fixture(&server);

    Mock::given(method("POST"))
        .and(SignedWith("reference-secret".to_string()))
        .and(body_partial_json(json!({"schema_request": {}})))
        .respond_with(ok_body(json!({
            "views": [],
            "config": {"fields": {}},
            "request": {"scan": {}, "clean": {}},
            "required_events": ["detection"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let schema = fetch_reference_schema(&forwarder(), &server.uri(), "reference-secret")
        .await
        .unwrap();
    let registry = f.mux.registry(&schema);

    assert_eq!(registry.actions(), vec!["clean", "scan"]);
    assert_eq!(
        registry.event_names(),
        vec!["detection", "subscribe", "unsubscribe"]
    );

    let dispatcher = f.mux.dispatcher("scanner", "mux-secret", schema);
    assert_eq!(
        dispatcher.schema().required_events,
        vec!["detection", "subscribe", "unsubscribe"]
    );
}

#[tokio::test]
async fn test_reference_schema_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "not ready",
            "version": PROTOCOL_VERSION
        })))
        .mount(&server)
        .await;

    let err = fetch_reference_schema(&forwarder(), &server.uri(), "s")
        .await
        .unwrap_err();
    assert!(matches!(err, MultiplexError::Schema(ref m) if m == "not ready"));
}

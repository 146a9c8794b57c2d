//! Shared harness for end-to-end tests
//!
//! Every provisioned instance is a real extension dispatcher listening on a
//! loopback port and keyed with the secret it was created with.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use extmux_core::{
    ConfigValidationMessage, ContinuationRequest, Dict, EventMessage, Message, PROTOCOL_VERSION,
    RequestMessage, Response, SchemaResponse, TenantAccess, sign,
};
use extmux_directory::{DirectoryStore, ServiceDirectory};
use extmux_egress::{Forwarder, HttpClientConfig};
use extmux_ingress::{
    Dispatcher, EventParams, HandlerError, HandlerRegistry, Reply, RequestParams, RequestRoute,
    SchemaDescriptors, TenantClient,
};
use extmux_multiplexer::{Multiplexer, fetch_reference_schema};
use extmux_provision::{InstanceProvisioner, ProvisionError, ServiceDefinition};
use http_body_util::BodyExt;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub const FRONT_SECRET: &str = "front-secret";
pub const REFERENCE_SECRET: &str = "reference-secret";

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// How a backend instance answers lifecycle events.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    pub reject_subscribe: bool,
}

/// Handlers of the extension being multiplexed.
///
/// `served_by` is echoed back so tests can tell instances apart.
pub fn backend_registry(served_by: &str, behavior: Behavior) -> HandlerRegistry {
    let served_by = served_by.to_string();
    HandlerRegistry::new()
        .request(
            "scan",
            RequestRoute::untyped(move |p: RequestParams<Dict>| {
                let served_by = served_by.clone();
                async move {
                    Ok(Reply::with_data(json!({
                        "tenant": p.client.tenant_id(),
                        "served_by": served_by,
                        "target": p.request.get("target").cloned().unwrap_or_default(),
                        "idempotency_key": p.idempotency_key,
                    }))
                    .continuation(
                        ContinuationRequest::new("scan", 30)
                            .with_state(p.request.clone()),
                    ))
                }
            }),
        )
        .request(
            "flaky",
            RequestRoute::untyped(|_| async { Err(HandlerError::new("busy")) }),
        )
        .event("subscribe", move |_: EventParams| async move {
            if behavior.reject_subscribe {
                Err(HandlerError::new("quota exceeded"))
            } else {
                Ok(Reply::empty())
            }
        })
        .event("unsubscribe", |_| async { Ok(Reply::empty()) })
        .event("detection", |p: EventParams| async move {
            Ok(Reply::with_data(serde_json::Value::Object(p.data)))
        })
        .validate_config(|_: TenantClient, config: Dict| async move {
            if config.contains_key("api_key") {
                Ok(Reply::empty())
            } else {
                Err(HandlerError::fatal("api_key is required"))
            }
        })
}

fn backend_schema() -> SchemaDescriptors {
    SchemaDescriptors {
        views: vec![json!({"name": "main"})],
        config: json!({"fields": {"api_key": {"data_type": "secret"}}}),
        request: BTreeMap::from([
            ("flaky".to_string(), json!({})),
            ("scan".to_string(), json!({"fields": {"target": {}}})),
        ]),
    }
}

/// Serve `dispatcher` on a loopback port.
pub async fn serve(dispatcher: Dispatcher) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let router = Arc::new(dispatcher).router();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (address, handle)
}

/// Provisioner starting one in-process backend per tenant.
#[derive(Default)]
pub struct LocalProvisioner {
    behavior: Behavior,
    instances: Mutex<HashMap<String, JoinHandle<()>>>,
    secrets: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl LocalProvisioner {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn running(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    pub fn secret_of(&self, tenant_id: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(tenant_id).cloned()
    }
}

#[async_trait]
impl InstanceProvisioner for LocalProvisioner {
    async fn create(
        &self,
        tenant_id: &str,
        _definition: &ServiceDefinition,
        secret: &str,
    ) -> extmux_provision::Result<String> {
        let dispatcher = Dispatcher::new(
            "scanner",
            secret,
            backend_registry(&format!("scanner-{}", tenant_id), self.behavior),
        );
        let (address, handle) = serve(dispatcher).await;
        self.instances
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), handle);
        self.secrets
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), secret.to_string());
        self.log.lock().unwrap().push(format!("create:{}", tenant_id));
        Ok(address)
    }

    async fn make_reachable(&self, tenant_id: &str, _address: &str) -> extmux_provision::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("make_reachable:{}", tenant_id));
        Ok(())
    }

    async fn destroy(&self, tenant_id: &str) -> extmux_provision::Result<()> {
        let handle = self.instances.lock().unwrap().remove(tenant_id);
        match handle {
            Some(handle) => {
                handle.abort();
                self.log.lock().unwrap().push(format!("destroy:{}", tenant_id));
                Ok(())
            }
            None => Err(ProvisionError::NotFound(tenant_id.to_string())),
        }
    }
}

/// A reference instance plus everything needed to stand up multiplexer fronts.
pub struct Harness {
    pub provisioner: Arc<LocalProvisioner>,
    pub schema: SchemaResponse,
    _reference: JoinHandle<()>,
}

#[allow(dead_code)]
impl Harness {
    /// Start the reference instance and load its schema through a forwarder.
    pub async fn start(behavior: Behavior) -> Self {
        let reference = Dispatcher::new(
            "scanner",
            REFERENCE_SECRET,
            backend_registry("reference", Behavior::default()),
        )
        .with_schema(backend_schema());
        let (address, handle) = serve(reference).await;

        let schema = fetch_reference_schema(&forwarder(), &address, REFERENCE_SECRET)
            .await
            .unwrap();

        Self {
            provisioner: Arc::new(LocalProvisioner::new(behavior)),
            schema,
            _reference: handle,
        }
    }

    pub fn multiplexer(&self, store: Arc<dyn DirectoryStore>) -> Arc<Multiplexer> {
        let definition = ServiceDefinition {
            image: "registry.example.com/scanner:1".to_string(),
            ..Default::default()
        };
        let directory = ServiceDirectory::new(store, self.provisioner.clone(), definition);
        Arc::new(Multiplexer::new(directory, forwarder()))
    }

    /// Multiplexer front router backed by `store`.
    pub fn front(&self, store: Arc<dyn DirectoryStore>) -> Router {
        let dispatcher = self
            .multiplexer(store)
            .dispatcher("scanner-mux", FRONT_SECRET, self.schema.clone());
        Arc::new(dispatcher).router()
    }
}

pub fn forwarder() -> Forwarder {
    Forwarder::new(&HttpClientConfig {
        timeout_secs: 5,
        ..Default::default()
    })
    .unwrap()
}

pub fn tenant(id: &str) -> TenantAccess {
    TenantAccess::new(id, format!("jwt-for-{}", id))
}

#[allow(dead_code)]
pub fn request(tenant_id: &str, action: &str, data: serde_json::Value) -> Message {
    Message::new(PROTOCOL_VERSION, format!("idem-{}", action)).with_request(RequestMessage {
        tenant: tenant(tenant_id),
        action: action.to_string(),
        data: data.as_object().cloned().unwrap_or_default(),
        ..Default::default()
    })
}

#[allow(dead_code)]
pub fn event(tenant_id: &str, name: &str, data: serde_json::Value) -> Message {
    Message::new(PROTOCOL_VERSION, format!("idem-{}", name)).with_event(EventMessage {
        tenant: tenant(tenant_id),
        event_name: name.to_string(),
        data: data.as_object().cloned().unwrap_or_default(),
        ..Default::default()
    })
}

#[allow(dead_code)]
pub fn config_validation(tenant_id: &str, config: serde_json::Value) -> Message {
    Message::new(PROTOCOL_VERSION, "").with_config_validation(ConfigValidationMessage {
        tenant: tenant(tenant_id),
        config: config.as_object().cloned().unwrap_or_default(),
    })
}

/// Sign `message` with `secret` and post it to `router`.
///
/// The envelope is `None` when the body is empty.
pub async fn post_signed(
    router: &Router,
    secret: &str,
    message: &Message,
) -> (StatusCode, Option<Response>) {
    let body = serde_json::to_vec(message).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("lc-ext-sig", sign(secret.as_bytes(), &body))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    if body.is_empty() {
        return (status, None);
    }
    (status, Some(serde_json::from_slice(&body).unwrap()))
}

#[allow(dead_code)]
pub async fn post(router: &Router, message: &Message) -> (StatusCode, Option<Response>) {
    post_signed(router, FRONT_SECRET, message).await
}

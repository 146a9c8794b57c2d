//! Signed-message dispatcher
//!
//! Accepts one POST per message on `/`. The flow for every call:
//!
//! 1. No signature header: liveness probe, answer 200 with an empty body.
//! 2. Read the raw body and check its HMAC against the shared secret.
//! 3. Decompress (gzip), parse, and classify the envelope.
//! 4. Route to the heartbeat, schema, validator, request or event path.
//! 5. Encode the response; retriability is conveyed by the status code.
//!
//! Every rejection or failure is reported to the error sink, masked with the
//! caller's credential.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use extmux_core::{
    ErrorReport, EventMessage, Message, PROTOCOL_VERSION, Payload, RequestMessage,
    Response as Envelope, SIGNATURE_HEADER, SchemaResponse, TenantAccess, masking::mask_secrets,
    verify,
};
use extmux_observability::Metrics;
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{DefaultClientFactory, TenantClient, TenantClientFactory};
use crate::registry::{EventParams, HandlerRegistry, RequestParams};
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::types::IngressError;

/// Default cap on inbound bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Static schema advertised on schema requests.
///
/// The event list is always derived from the registry.
#[derive(Debug, Clone, Default)]
pub struct SchemaDescriptors {
    pub views: Vec<serde_json::Value>,
    pub config: serde_json::Value,
    pub request: std::collections::BTreeMap<String, serde_json::Value>,
}

impl From<SchemaResponse> for SchemaDescriptors {
    fn from(schema: SchemaResponse) -> Self {
        Self {
            views: schema.views,
            config: schema.config,
            request: schema.request,
        }
    }
}

/// A failed call along with what was learnt about it before it failed.
#[derive(Debug)]
pub struct Rejection {
    pub error: IngressError,
    pub kind: &'static str,
    pub tenant: Option<TenantAccess>,
}

impl From<IngressError> for Rejection {
    fn from(error: IngressError) -> Self {
        Self {
            error,
            kind: "unknown",
            tenant: None,
        }
    }
}

impl Rejection {
    fn new(error: impl Into<IngressError>, kind: &'static str, tenant: &TenantAccess) -> Self {
        Self {
            error: error.into(),
            kind,
            tenant: Some(tenant.clone()),
        }
    }

    /// Error text with the tenant credential removed.
    pub fn masked_message(&self) -> String {
        let message = self.error.to_string();
        match &self.tenant {
            Some(tenant) => mask_secrets(&message, &[tenant.credential()]),
            None => message,
        }
    }
}

/// Verifies, classifies and routes inbound messages for one extension.
pub struct Dispatcher {
    name: String,
    secret: String,
    registry: HandlerRegistry,
    schema: SchemaDescriptors,
    client_factory: Arc<dyn TenantClientFactory>,
    metrics: Option<Arc<Metrics>>,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, secret: impl Into<String>, registry: HandlerRegistry) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            registry,
            schema: SchemaDescriptors::default(),
            client_factory: Arc::new(DefaultClientFactory),
            metrics: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<SchemaDescriptors>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_client_factory(mut self, factory: Arc<dyn TenantClientFactory>) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Schema advertised on schema requests.
    pub fn schema(&self) -> SchemaResponse {
        SchemaResponse {
            views: self.schema.views.clone(),
            config: self.schema.config.clone(),
            request: self.schema.request.clone(),
            required_events: self.registry.event_names(),
        }
    }

    /// Router serving the dispatcher on `POST /`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", post(handle_message))
            .with_state(self)
    }

    /// Handle one HTTP call end to end.
    pub async fn handle(&self, headers: &HeaderMap, body: Body) -> Response {
        let signature = match headers.get(SIGNATURE_HEADER) {
            None => return StatusCode::OK.into_response(),
            Some(value) if value.is_empty() => return StatusCode::OK.into_response(),
            Some(value) => value.to_str().unwrap_or_default().to_string(),
        };

        match self.process(&signature, headers, body).await {
            Ok((kind, response)) => {
                self.record(kind, StatusCode::OK);
                (StatusCode::OK, axum::Json(response)).into_response()
            }
            Err(rejection) => {
                let message = rejection.masked_message();
                let status = rejection.error.status();
                self.record(rejection.kind, status);
                warn!(
                    extension = %self.name,
                    kind = rejection.kind,
                    status = status.as_u16(),
                    "rejected message: {}",
                    message
                );
                self.report(ErrorReport::for_tenant(
                    message.clone(),
                    rejection
                        .tenant
                        .as_ref()
                        .map(|t| t.id.clone())
                        .unwrap_or_default(),
                ));
                rejection.error.into_response_with(message)
            }
        }
    }

    async fn process(
        &self,
        signature: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<(&'static str, Envelope), Rejection> {
        let raw = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| IngressError::BodyRead(e.to_string()))?;

        if !verify(&raw, signature, self.secret.as_bytes()) {
            return Err(IngressError::InvalidSignature.into());
        }

        let raw = if is_gzip(headers) {
            decompress(raw, self.max_body_bytes).await?
        } else {
            raw
        };

        let message: Message = serde_json::from_slice(&raw).map_err(IngressError::from)?;
        let response = self.dispatch(&message).await?;
        Ok((
            message.payload().map(|p| p.kind()).unwrap_or("unknown"),
            response,
        ))
    }

    /// Route an authenticated, decoded message.
    ///
    /// # Errors
    /// Returns a [`Rejection`] carrying the error, the payload kind and the
    /// tenant, if any.
    pub async fn dispatch(&self, message: &Message) -> Result<Envelope, Rejection> {
        let payload = message.payload().map_err(IngressError::from)?;
        debug!(extension = %self.name, kind = payload.kind(), "dispatching message");

        let response = match payload {
            Payload::HeartBeat => Envelope::default(),
            Payload::ErrorReport(report) => {
                self.report(report.clone());
                Envelope::default()
            }
            Payload::SchemaRequest => {
                let schema = serde_json::to_value(self.schema()).map_err(IngressError::from)?;
                Envelope::ok(Some(schema))
            }
            Payload::ConfigValidation(validation) => {
                let kind = payload.kind();
                let client = self.client(&validation.tenant, kind).await?;
                self.registry
                    .run_validator(client, validation.config.clone())
                    .await
                    .map_err(|e| Rejection::new(e, kind, &validation.tenant))?
                    .into()
            }
            Payload::Request(request) => {
                self.dispatch_request(request, &message.idempotency_key)
                    .await?
            }
            Payload::Event(event) => self.dispatch_event(event, &message.idempotency_key).await?,
        };

        Ok(response.with_version(PROTOCOL_VERSION))
    }

    async fn dispatch_request(
        &self,
        request: &RequestMessage,
        idempotency_key: &str,
    ) -> Result<Envelope, Rejection> {
        let tenant = &request.tenant;
        let route = self.registry.request_route(&request.action).ok_or_else(|| {
            Rejection::new(
                IngressError::UnknownAction(request.action.clone()),
                "request",
                tenant,
            )
        })?;
        let client = self.client(tenant, "request").await?;

        let params = RequestParams {
            client,
            action: request.action.clone(),
            request: request.data.clone(),
            config: request.config.clone(),
            idempotency_key: idempotency_key.to_string(),
            resource_state: request.resource_state.clone(),
            investigation_id: request.investigation_id.clone(),
        };
        let handler = route
            .call(params)
            .map_err(|e| Rejection::new(IngressError::InvalidRequestData(e), "request", tenant))?;

        let reply = handler
            .await
            .map_err(|e| Rejection::new(e, "request", tenant))?;
        Ok(reply.into())
    }

    async fn dispatch_event(
        &self,
        event: &EventMessage,
        idempotency_key: &str,
    ) -> Result<Envelope, Rejection> {
        let tenant = &event.tenant;
        let route = self.registry.event_route(&event.event_name).ok_or_else(|| {
            Rejection::new(
                IngressError::UnknownEvent(event.event_name.clone()),
                "event",
                tenant,
            )
        })?;
        let client = self.client(tenant, "event").await?;

        let params = EventParams {
            client,
            event_name: event.event_name.clone(),
            data: event.data.clone(),
            config: event.config.clone(),
            idempotency_key: idempotency_key.to_string(),
        };
        let reply = route
            .call(params)
            .await
            .map_err(|e| Rejection::new(e, "event", tenant))?;
        Ok(reply.into())
    }

    async fn client(
        &self,
        tenant: &TenantAccess,
        kind: &'static str,
    ) -> Result<TenantClient, Rejection> {
        self.client_factory
            .build(tenant)
            .await
            .map_err(|e| Rejection::new(IngressError::TenantClient(e.to_string()), kind, tenant))
    }

    fn report(&self, report: ErrorReport) {
        match self.registry.sink() {
            Some(sink) => sink.report(&report),
            None => TracingErrorSink.report(&report),
        }
    }

    fn record(&self, kind: &str, status: StatusCode) {
        if let Some(metrics) = &self.metrics {
            metrics.record_message(kind, status.as_u16());
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

async fn handle_message(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    dispatcher.handle(&headers, body).await
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

/// Inflate a gzip body, refusing output larger than `limit` bytes.
async fn decompress(raw: Bytes, limit: usize) -> Result<Bytes, IngressError> {
    tokio::task::spawn_blocking(move || {
        let mut decoder = GzDecoder::new(raw.as_ref()).take(limit as u64 + 1);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| IngressError::Decompression(e.to_string()))?;
        if out.len() > limit {
            return Err(IngressError::Decompression(format!(
                "body exceeds {} bytes once decompressed",
                limit
            )));
        }
        Ok(Bytes::from(out))
    })
    .await
    .map_err(|e| IngressError::Decompression(e.to_string()))?
}

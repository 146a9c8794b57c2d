//! Signed forwarding to tenant instances
//!
//! Each envelope is serialized once, signed with the target instance's secret,
//! and posted to the instance address exactly once. Error responses keep
//! their envelope; retriability is recovered from the status code (503
//! retriable, 500 fatal, anything else left at the default).

use extmux_core::{Message, Response, SIGNATURE_HEADER, sign};
use extmux_observability::Metrics;
use reqwest::{Client, StatusCode, header};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::client::{HttpClientConfig, create_client};
use crate::{EgressError, Result};

/// Posts signed envelopes to instances.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    timeout_secs: u64,
    metrics: Option<Arc<Metrics>>,
}

impl Forwarder {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            timeout_secs: config.timeout_secs,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sign and post `message` to `address`.
    ///
    /// `target` names the action or event, for logs and metrics.
    ///
    /// Nothing is retried here. Redelivery is left to the platform, driven by
    /// [`EgressError::is_retriable`] or the envelope's retriable flag.
    ///
    /// # Errors
    /// Transport failures, and non-success statuses whose body is not a
    /// response envelope. Error envelopes are returned as `Ok`.
    pub async fn send(
        &self,
        address: &str,
        secret: &str,
        message: &Message,
        target: &str,
    ) -> Result<Response> {
        let body = serde_json::to_vec(message)?;
        let signature = sign(secret.as_bytes(), &body);
        let started = Instant::now();

        let result = self.post(address, &signature, body).await;

        let outcome = match &result {
            Ok(response) if !response.is_error() => "ok",
            Ok(response) if response.is_retriable() => "retriable_error",
            Ok(_) => "error",
            Err(_) => "transport_error",
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_forward(target, outcome, started.elapsed().as_secs_f64());
        }
        debug!(
            target_name = target,
            outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "forwarded message"
        );

        result
    }

    async fn post(&self, address: &str, signature: &str, body: Vec<u8>) -> Result<Response> {
        let response = self
            .client
            .post(address)
            .header(SIGNATURE_HEADER, signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        decode_response(status, &bytes)
    }

    fn transport_error(&self, e: reqwest::Error) -> EgressError {
        if e.is_timeout() {
            EgressError::Timeout(self.timeout_secs)
        } else {
            EgressError::HttpError(e)
        }
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

fn decode_response(status: StatusCode, bytes: &[u8]) -> Result<Response> {
    if status.is_success() {
        if bytes.is_empty() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Response::error("instance could not read the request")
                    .with_retriable(true));
            }
            return Ok(Response::default());
        }
        return serde_json::from_slice(bytes)
            .map_err(|e| EgressError::ParseError(e.to_string()));
    }

    match serde_json::from_slice::<Response>(bytes) {
        Ok(response) if response.is_error() => Ok(match status {
            StatusCode::SERVICE_UNAVAILABLE => response.with_retriable(true),
            StatusCode::INTERNAL_SERVER_ERROR => response.with_retriable(false),
            _ => response,
        }),
        _ => {
            let message = String::from_utf8_lossy(bytes).trim().to_string();
            warn!(status = status.as_u16(), "instance returned {}", status);
            Err(EgressError::ProviderError {
                status_code: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    message
                },
            })
        }
    }
}

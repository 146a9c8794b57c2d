//! Handler registry
//!
//! Maps action names and event names to async handlers. Request handlers are
//! registered either untyped (they receive the raw JSON object) or typed, in
//! which case the data is decoded into the handler's parameter type before the
//! handler runs and a decode failure is reported back to the caller.

use extmux_core::{ContinuationRequest, Dict, MetricReport, ResourceState, Response};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::client::TenantClient;
use crate::sink::ErrorSink;

/// Failure returned by a handler.
///
/// Retriable unless built with [`HandlerError::fatal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retriable: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retriable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retriable: false,
        }
    }
}

/// Successful handler output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub data: Option<serde_json::Value>,
    pub continuations: Vec<ContinuationRequest>,
    pub metrics: Option<MetricReport>,
}

impl Reply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn continuation(mut self, continuation: ContinuationRequest) -> Self {
        self.continuations.push(continuation);
        self
    }

    pub fn metrics(mut self, metrics: MetricReport) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response {
            data: reply.data,
            continuations: reply.continuations,
            metrics: reply.metrics,
            ..Response::default()
        }
    }
}

pub type HandlerResult = Result<Reply, HandlerError>;

/// Convert a response envelope produced elsewhere (for example by a
/// downstream instance) into a handler result.
pub fn reply_from_response(response: Response) -> HandlerResult {
    if response.is_error() {
        return Err(HandlerError {
            retriable: response.is_retriable(),
            message: response.error,
        });
    }
    Ok(Reply {
        data: response.data,
        continuations: response.continuations,
        metrics: response.metrics,
    })
}

/// Inputs of a request handler.
#[derive(Debug, Clone)]
pub struct RequestParams<T> {
    pub client: TenantClient,
    pub action: String,
    pub request: T,
    pub config: Dict,
    pub idempotency_key: String,
    pub resource_state: HashMap<String, ResourceState>,
    pub investigation_id: Option<String>,
}

impl<T> RequestParams<T> {
    fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<RequestParams<U>, E> {
        Ok(RequestParams {
            request: f(self.request)?,
            client: self.client,
            action: self.action,
            config: self.config,
            idempotency_key: self.idempotency_key,
            resource_state: self.resource_state,
            investigation_id: self.investigation_id,
        })
    }
}

/// Inputs of an event handler.
#[derive(Debug, Clone)]
pub struct EventParams {
    pub client: TenantClient,
    pub event_name: String,
    pub data: Dict,
    pub config: Dict,
    pub idempotency_key: String,
}

type RequestFn = dyn Fn(RequestParams<Dict>) -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error>
    + Send
    + Sync;

/// A registered request handler.
#[derive(Clone)]
pub struct RequestRoute {
    call: Arc<RequestFn>,
    typed: bool,
}

impl RequestRoute {
    /// Handler receiving the request data as a raw JSON object.
    pub fn untyped<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestParams<Dict>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            call: Arc::new(
                move |params: RequestParams<Dict>| -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> {
                    Ok(Box::pin(handler(params)))
                },
            ),
            typed: false,
        }
    }

    /// Handler receiving the request data decoded into `P`.
    pub fn typed<P, F, Fut>(handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(RequestParams<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            call: Arc::new(
                move |params: RequestParams<Dict>| -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> {
                    let params = params
                        .try_map(|data| serde_json::from_value::<P>(serde_json::Value::Object(data)))?;
                    Ok(Box::pin(handler(params)))
                },
            ),
            typed: true,
        }
    }

    pub fn is_typed(&self) -> bool {
        self.typed
    }

    /// Decode the parameters if needed and start the handler.
    ///
    /// # Errors
    /// Returns the decode error when a typed handler's data does not match.
    pub fn call(
        &self,
        params: RequestParams<Dict>,
    ) -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> {
        (self.call)(params)
    }
}

type EventFn = dyn Fn(EventParams) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A registered event handler.
#[derive(Clone)]
pub struct EventRoute(Arc<EventFn>);

impl EventRoute {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(EventParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self(Arc::new(
            move |params: EventParams| -> BoxFuture<'static, HandlerResult> {
                Box::pin(handler(params))
            },
        ))
    }

    pub fn call(&self, params: EventParams) -> BoxFuture<'static, HandlerResult> {
        (self.0)(params)
    }
}

type ValidatorFn = dyn Fn(TenantClient, Dict) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Action and event handlers of one extension.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    requests: BTreeMap<String, RequestRoute>,
    events: BTreeMap<String, EventRoute>,
    validator: Option<Arc<ValidatorFn>>,
    error_sink: Option<Arc<dyn ErrorSink>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, action: impl Into<String>, route: RequestRoute) -> Self {
        self.requests.insert(action.into(), route);
        self
    }

    pub fn event<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.events.insert(name.into(), EventRoute::new(handler));
        self
    }

    /// Install the configuration validator. Without one, every configuration
    /// is accepted.
    pub fn validate_config<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(TenantClient, Dict) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.validator = Some(Arc::new(
            move |client: TenantClient, config: Dict| -> BoxFuture<'static, HandlerResult> {
                Box::pin(validator(client, config))
            },
        ));
        self
    }

    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn request_route(&self, action: &str) -> Option<&RequestRoute> {
        self.requests.get(action)
    }

    pub fn event_route(&self, name: &str) -> Option<&EventRoute> {
        self.events.get(name)
    }

    pub fn sink(&self) -> Option<&Arc<dyn ErrorSink>> {
        self.error_sink.as_ref()
    }

    /// Run the configuration validator, if any.
    pub async fn run_validator(&self, client: TenantClient, config: Dict) -> HandlerResult {
        match &self.validator {
            Some(validator) => validator(client, config).await,
            None => Ok(Reply::empty()),
        }
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        self.requests.keys().cloned().collect()
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("requests", &self.actions())
            .field("events", &self.event_names())
            .field("validator", &self.validator.is_some())
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

//! ExtMux Ingress
//!
//! HTTP side of an extension: the signed-message [`Dispatcher`], the
//! [`HandlerRegistry`] it routes into, and the tenant client and error sink
//! seams handlers depend on.

pub mod client;
pub mod dispatcher;
pub mod middleware;
pub mod registry;
pub mod sink;
pub mod types;

pub use client::{ClientError, DefaultClientFactory, TenantClient, TenantClientFactory};
pub use dispatcher::{DEFAULT_MAX_BODY_BYTES, Dispatcher, Rejection, SchemaDescriptors};
pub use middleware::{RequestIdExt, request_context_middleware};
pub use registry::{
    EventParams, EventRoute, HandlerError, HandlerRegistry, HandlerResult, Reply, RequestParams,
    RequestRoute, reply_from_response,
};
pub use sink::{ErrorSink, TracingErrorSink};
pub use types::{IngressError, IngressResult, RequestId};

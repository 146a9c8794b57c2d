//! ExtMux Core Types
//!
//! This crate provides the protocol types shared by every ExtMux component:
//! - The versioned message envelope and its payload kinds
//! - The response envelope, continuations and usage metrics
//! - Request signing and verification
//! - Secret masking for diagnostics
//! - Core error types

pub mod error;
pub mod masking;
pub mod message;
pub mod response;
pub mod schema;
pub mod signature;
pub mod tenant;

pub use error::{Error, Result};
pub use message::{
    ConfigValidationMessage, Dict, ErrorReport, EventMessage, HeartBeatMessage, Message,
    Payload, RequestMessage, ResourceState, SchemaRequestMessage,
};
pub use response::{ContinuationRequest, Metric, MetricReport, Response};
pub use schema::SchemaResponse;
pub use signature::{SIGNATURE_HEADER, sign, verify};
pub use tenant::TenantAccess;

/// Protocol version stamped on every envelope and successful response.
pub const PROTOCOL_VERSION: u64 = 20221218;

/// Lifecycle event names with special meaning to the multiplexer.
pub mod events {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

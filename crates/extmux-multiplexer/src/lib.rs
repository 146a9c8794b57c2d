//! ExtMux Multiplexer
//!
//! Serves a single extension endpoint and fans it out to one dedicated
//! instance per tenant:
//! - `subscribe` provisions the tenant's instance, then forwards the event
//! - `unsubscribe` forwards the event, then always deprovisions
//! - every other request, event and configuration validation is re-signed
//!   with the tenant instance's secret and forwarded as-is
//!
//! The handler registry is assembled from the schema of a reference instance,
//! so the multiplexer advertises exactly what the instances implement.

pub mod error;
pub mod hook;
pub mod multiplexer;
pub mod schema;

pub use error::{MultiplexError, Result};
pub use hook::{MessageHook, PassThroughHook, TimingHook};
pub use multiplexer::Multiplexer;
pub use schema::fetch_reference_schema;

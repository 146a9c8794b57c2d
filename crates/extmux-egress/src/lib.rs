//! ExtMux Egress
//!
//! Outbound HTTP: the shared client configuration and the [`Forwarder`] that
//! signs envelopes and posts them to tenant instances.

pub mod client;
pub mod forwarder;

pub use client::{HttpClientConfig, create_client};
pub use forwarder::Forwarder;

use thiserror::Error;

/// Egress error types
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    /// Non-success status without a decodable response envelope
    #[error("Upstream error ({status_code}): {message}")]
    ProviderError { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl EgressError {
    /// Whether the platform should redeliver the message that caused this.
    pub fn is_retriable(&self) -> bool {
        match self {
            EgressError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            EgressError::Timeout(_) => true,
            EgressError::ProviderError { status_code, .. } => {
                matches!(status_code, 429 | 502 | 503 | 504)
            }
            EgressError::ParseError(_)
            | EgressError::Serialization(_)
            | EgressError::ConfigError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EgressError>;

//! Shared ingress types and utilities

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use extmux_core::{PROTOCOL_VERSION, Response as Envelope};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::HandlerError;

/// Request ID for tracing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons an inbound call is rejected or fails.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The body could not be read off the connection
    #[error("failed reading request body: {0}")]
    BodyRead(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("failed decompressing request body: {0}")]
    Decompression(String),

    #[error("failed parsing message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidEnvelope(#[from] extmux_core::Error),

    #[error("unknown request action: {0}")]
    UnknownAction(String),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("failed to unmarshal request data: {0}")]
    InvalidRequestData(serde_json::Error),

    #[error("failed initializing tenant client: {0}")]
    TenantClient(String),

    #[error("{0}")]
    Handler(#[from] HandlerError),
}

impl IngressError {
    /// HTTP status conveying this error on the wire.
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::BodyRead(_) => StatusCode::NO_CONTENT,
            IngressError::InvalidSignature => StatusCode::UNAUTHORIZED,
            IngressError::Decompression(_)
            | IngressError::InvalidMessage(_)
            | IngressError::InvalidEnvelope(_)
            | IngressError::UnknownAction(_)
            | IngressError::UnknownEvent(_)
            | IngressError::InvalidRequestData(_) => StatusCode::BAD_REQUEST,
            IngressError::TenantClient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngressError::Handler(err) if err.retriable => StatusCode::SERVICE_UNAVAILABLE,
            IngressError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the HTTP response, with `message` as the envelope error.
    ///
    /// Signature and body-read failures carry no body.
    pub fn into_response_with(self, message: String) -> Response {
        let status = self.status();
        match self {
            IngressError::InvalidSignature | IngressError::BodyRead(_) => status.into_response(),
            _ => (
                status,
                axum::Json(Envelope::error(message).with_version(PROTOCOL_VERSION)),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        self.into_response_with(message)
    }
}

pub type IngressResult<T> = Result<T, IngressError>;

//! Multiplexer errors

use extmux_directory::DirectoryError;
use extmux_egress::EgressError;
use extmux_ingress::HandlerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("failed to get service: {0}")]
    Directory(#[from] DirectoryError),

    #[error("failed to forward: {0}")]
    Forward(#[from] EgressError),

    #[error("message hook failed: {0}")]
    Hook(String),

    /// Tearing down an instance after a failed subscribe failed too
    #[error("failed to remove instance after failed subscribe: {cause}; original error: {original}")]
    Rollback { original: String, cause: String },

    #[error("reference schema unavailable: {0}")]
    Schema(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure that re-delivery cannot fix
    #[error("{0}")]
    Fatal(String),
}

impl MultiplexError {
    pub fn hook(message: impl Into<String>) -> Self {
        MultiplexError::Hook(message.into())
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            MultiplexError::Directory(e) => e.is_retriable(),
            MultiplexError::Forward(e) => e.is_retriable(),
            MultiplexError::Hook(_) | MultiplexError::Schema(_) => true,
            MultiplexError::Rollback { .. }
            | MultiplexError::Serialization(_)
            | MultiplexError::Fatal(_) => false,
        }
    }
}

impl From<MultiplexError> for HandlerError {
    fn from(error: MultiplexError) -> Self {
        HandlerError {
            retriable: error.is_retriable(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MultiplexError>;

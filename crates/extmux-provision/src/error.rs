//! Provisioning errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The instance does not exist
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("invalid service definition: {0}")]
    InvalidDefinition(String),

    #[error("control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("control plane returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected control plane response: {0}")]
    InvalidResponse(String),

    #[error("invalid provisioner configuration: {0}")]
    Config(String),
}

impl ProvisionError {
    pub fn is_retriable(&self) -> bool {
        match self {
            ProvisionError::Transport(_) => true,
            ProvisionError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisionError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

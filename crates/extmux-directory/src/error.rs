//! Service directory errors

use extmux_provision::ProvisionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No instance is registered for the tenant; the caller must provision
    #[error("no instance registered for tenant {0}")]
    NotFound(String),

    #[error("directory store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Rolling back a partial provision failed; state may be inconsistent
    #[error("cleanup after failed provisioning of {tenant} failed: {cause}; original error: {original}")]
    Compensation {
        tenant: String,
        original: String,
        cause: String,
    },
}

impl DirectoryError {
    pub fn is_retriable(&self) -> bool {
        match self {
            DirectoryError::NotFound(_) => false,
            DirectoryError::Store(_) | DirectoryError::Io(_) => true,
            DirectoryError::Provision(e) => e.is_retriable(),
            DirectoryError::Compensation { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

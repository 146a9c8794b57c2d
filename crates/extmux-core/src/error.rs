//! Error types for ExtMux Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no data in request")]
    NoPayload,

    #[error("no data in request: {0} payload kinds set")]
    AmbiguousPayload(usize),

    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Response envelope

use serde::{Deserialize, Serialize};

use crate::Dict;

/// A handler's request to be re-invoked later.
///
/// The core never schedules continuations; it returns them once in the
/// response for an external scheduler to honor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRequest {
    #[serde(default)]
    pub delay_seconds: u64,

    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub state: Dict,
}

impl ContinuationRequest {
    pub fn new(action: impl Into<String>, delay_seconds: u64) -> Self {
        Self {
            delay_seconds,
            action: action.into(),
            state: Dict::new(),
        }
    }

    pub fn with_state(mut self, state: Dict) -> Self {
        self.state = state;
        self
    }
}

/// A single usage measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub sku: String,
    pub value: u64,
}

/// Billable usage reported by a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricReport {
    #[serde(default)]
    pub idempotent_key: String,

    #[serde(default)]
    pub metrics: Vec<Metric>,
}

/// Response envelope returned for every authenticated call.
///
/// An empty `error` means success. Whether a failure should be re-delivered
/// is tracked in `retriable`, which is never serialized: on the wire it is
/// conveyed by the HTTP status code instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub error: String,

    #[serde(default)]
    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub continuations: Vec<ContinuationRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricReport>,

    #[serde(skip)]
    pub retriable: Option<bool>,
}

impl Response {
    /// Successful response carrying `data`.
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Failed response; retriable unless stated otherwise.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = Some(retriable);
        self
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Errors are retriable unless a handler explicitly opted out.
    pub fn is_retriable(&self) -> bool {
        self.retriable.unwrap_or(true)
    }
}

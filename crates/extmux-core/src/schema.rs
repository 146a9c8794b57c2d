//! Schema discovery payload
//!
//! The configuration, request and view descriptors are opaque JSON here;
//! only the action names (keys of `request`) and the event list carry meaning
//! for routing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaResponse {
    #[serde(default)]
    pub views: Vec<serde_json::Value>,

    #[serde(default)]
    pub config: serde_json::Value,

    /// Action name → request/response schema
    #[serde(default)]
    pub request: BTreeMap<String, serde_json::Value>,

    /// Event names the handler registry actually subscribes to
    #[serde(default)]
    pub required_events: Vec<String>,
}

impl SchemaResponse {
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.request.keys().map(String::as_str)
    }
}

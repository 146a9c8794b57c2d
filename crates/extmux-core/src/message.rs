//! Message envelope
//!
//! Every inbound call carries exactly one payload kind. The envelope keeps one
//! optional field per kind so that the JSON shape stays a flat object, and
//! [`Message::payload`] turns it into a [`Payload`] after checking that exactly
//! one kind is present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result, TenantAccess};

/// Untyped JSON object used for request data, event data and configuration.
pub type Dict = serde_json::Map<String, serde_json::Value>;

/// Versioned request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub version: u64,

    /// Caller-supplied key, opaque to the core
    #[serde(default)]
    pub idempotency_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartBeatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_report: Option<ErrorReport>,

    #[serde(
        rename = "conf_validation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub config_validation: Option<ConfigValidationMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_request: Option<SchemaRequestMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeatMessage {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRequestMessage {}

/// Error forwarded by a peer, or produced locally, for the error sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default)]
    pub error: String,

    /// Tenant the error relates to, if any
    #[serde(rename = "oid", default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
}

impl ErrorReport {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            tenant_id: String::new(),
        }
    }

    pub fn for_tenant(error: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigValidationMessage {
    #[serde(rename = "org", default)]
    pub tenant: TenantAccess,

    #[serde(rename = "conf", default)]
    pub config: Dict,
}

/// Last known state of a resource the request refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(default)]
    pub state: serde_json::Value,

    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "org", default)]
    pub tenant: TenantAccess,

    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub data: Dict,

    #[serde(default)]
    pub config: Dict,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resource_state: HashMap<String, ResourceState>,

    #[serde(rename = "inv_id", default, skip_serializing_if = "Option::is_none")]
    pub investigation_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "org", default)]
    pub tenant: TenantAccess,

    #[serde(default)]
    pub event_name: String,

    #[serde(default)]
    pub data: Dict,

    #[serde(default)]
    pub config: Dict,
}

/// The single payload carried by a well-formed envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    HeartBeat,
    ErrorReport(&'a ErrorReport),
    ConfigValidation(&'a ConfigValidationMessage),
    SchemaRequest,
    Request(&'a RequestMessage),
    Event(&'a EventMessage),
}

impl Payload<'_> {
    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::HeartBeat => "heartbeat",
            Payload::ErrorReport(_) => "error_report",
            Payload::ConfigValidation(_) => "config_validation",
            Payload::SchemaRequest => "schema_request",
            Payload::Request(_) => "request",
            Payload::Event(_) => "event",
        }
    }

    /// Tenant the payload is bound to, if any.
    pub fn tenant(&self) -> Option<&TenantAccess> {
        match self {
            Payload::ConfigValidation(m) => Some(&m.tenant),
            Payload::Request(m) => Some(&m.tenant),
            Payload::Event(m) => Some(&m.tenant),
            _ => None,
        }
    }
}

impl Message {
    pub fn new(version: u64, idempotency_key: impl Into<String>) -> Self {
        Self {
            version,
            idempotency_key: idempotency_key.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat(version: u64) -> Self {
        Self {
            heartbeat: Some(HeartBeatMessage {}),
            ..Self::new(version, "")
        }
    }

    pub fn schema_request(version: u64) -> Self {
        Self {
            schema_request: Some(SchemaRequestMessage {}),
            ..Self::new(version, "")
        }
    }

    pub fn with_request(mut self, request: RequestMessage) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_event(mut self, event: EventMessage) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_config_validation(mut self, validation: ConfigValidationMessage) -> Self {
        self.config_validation = Some(validation);
        self
    }

    pub fn with_error_report(mut self, report: ErrorReport) -> Self {
        self.error_report = Some(report);
        self
    }

    /// Number of payload kinds present.
    pub fn payload_count(&self) -> usize {
        [
            self.heartbeat.is_some(),
            self.error_report.is_some(),
            self.config_validation.is_some(),
            self.schema_request.is_some(),
            self.request.is_some(),
            self.event.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Classify the envelope.
    ///
    /// Exactly one payload kind must be present; none or several yield a
    /// "no data in request" error. Kinds are checked in priority order:
    /// heartbeat, error report, config validation, schema request, request,
    /// event.
    pub fn payload(&self) -> Result<Payload<'_>> {
        match self.payload_count() {
            0 => return Err(Error::NoPayload),
            1 => {}
            n => return Err(Error::AmbiguousPayload(n)),
        }

        if self.heartbeat.is_some() {
            return Ok(Payload::HeartBeat);
        }
        if let Some(report) = &self.error_report {
            return Ok(Payload::ErrorReport(report));
        }
        if let Some(validation) = &self.config_validation {
            return Ok(Payload::ConfigValidation(validation));
        }
        if self.schema_request.is_some() {
            return Ok(Payload::SchemaRequest);
        }
        if let Some(request) = &self.request {
            return Ok(Payload::Request(request));
        }
        match &self.event {
            Some(event) => Ok(Payload::Event(event)),
            None => Err(Error::NoPayload),
        }
    }
}

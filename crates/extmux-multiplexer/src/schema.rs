//! Reference schema bootstrap

use extmux_core::{Message, PROTOCOL_VERSION, SchemaResponse};
use extmux_egress::Forwarder;
use tracing::{info, instrument};

use crate::{MultiplexError, Result};

/// Ask a reference instance for its schema with a signed `schema_request`.
///
/// # Errors
/// Transport failures, an error response, or a response without a schema.
#[instrument(skip(forwarder, secret))]
pub async fn fetch_reference_schema(
    forwarder: &Forwarder,
    url: &str,
    secret: &str,
) -> Result<SchemaResponse> {
    let response = forwarder
        .send(url, secret, &Message::schema_request(PROTOCOL_VERSION), "schema_request")
        .await?;
    if response.is_error() {
        return Err(MultiplexError::Schema(response.error));
    }
    let data = response
        .data
        .ok_or_else(|| MultiplexError::Schema("reference service returned no schema".to_string()))?;
    let schema: SchemaResponse = serde_json::from_value(data)?;

    info!(
        actions = schema.request.len(),
        events = ?schema.required_events,
        "reference schema loaded"
    );
    Ok(schema)
}

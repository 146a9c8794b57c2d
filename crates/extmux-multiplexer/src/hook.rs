//! Message hooks
//!
//! Hooks see every forwarded envelope before it is signed and every decoded
//! response before it is relayed. Returning an error aborts the forward.

use async_trait::async_trait;
use extmux_core::{Message, Response, TenantAccess};
use std::time::Instant;
use tracing::info;

use crate::Result;

#[async_trait]
pub trait MessageHook: Send + Sync {
    /// Rewrite the outbound envelope.
    async fn on_send(&self, _tenant: &TenantAccess, message: Message) -> Result<Message> {
        Ok(message)
    }

    /// Rewrite the instance's response. `started_at` is when the envelope
    /// was handed to the forwarder.
    async fn on_response(
        &self,
        _tenant: &TenantAccess,
        _message: &Message,
        response: Response,
        _started_at: Instant,
    ) -> Result<Response> {
        Ok(response)
    }
}

/// Leaves everything untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughHook;

impl MessageHook for PassThroughHook {}

/// Logs the round-trip of every forwarded envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingHook;

#[async_trait]
impl MessageHook for TimingHook {
    async fn on_response(
        &self,
        tenant: &TenantAccess,
        message: &Message,
        response: Response,
        started_at: Instant,
    ) -> Result<Response> {
        let kind = message.payload().map(|p| p.kind()).unwrap_or("unknown");
        info!(
            tenant = %tenant.id,
            kind,
            error = response.is_error(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "instance responded"
        );
        Ok(response)
    }
}

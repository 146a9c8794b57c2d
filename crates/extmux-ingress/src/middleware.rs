//! Shared ingress middleware

use crate::types::RequestId;
use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

/// Extension key for the request id
#[derive(Clone)]
pub struct RequestIdExt(pub RequestId);

/// Tag every call with a request id, reuse an inbound `x-request-id` when
/// present, and echo it on the response.
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| RequestId::from_string(v.to_string()))
        .unwrap_or_else(RequestId::generate);

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    req.extensions_mut().insert(RequestIdExt(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        user_agent = %user_agent
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

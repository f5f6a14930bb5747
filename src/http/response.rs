//! Response-side capture helpers.
//!
//! # Responsibilities
//! - Carry a handler's error message to the request-log middleware
//! - Buffer a bounded response body for capture without altering it
//!
//! # Design Decisions
//! - Streamed or unbounded bodies are never buffered; they log as null

use axum::body::{Body, HttpBody};
use axum::response::Response;
use serde_json::Value;

use crate::audit::capture::CapturePolicy;
use crate::http::request::fits;

/// Error description attached to a response by the handler that produced it.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

/// The error recorded for a response: the attached detail, else the reason
/// phrase for server errors.
pub fn error_message(response: &Response) -> Option<String> {
    if let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>() {
        return Some(detail.clone());
    }
    let status = response.status();
    if status.is_server_error() {
        return Some(
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
        );
    }
    None
}

/// Capture the response body when its size is bounded by the capture limit.
pub async fn capture_response_body(
    response: Response,
    policy: &CapturePolicy,
) -> (Response, Option<Value>) {
    if !fits(response.body().size_hint().upper(), policy.max_capture_bytes) {
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, policy.max_capture_bytes).await {
        Ok(bytes) => {
            let captured = policy.response_body(&bytes);
            (Response::from_parts(parts, Body::from(bytes)), captured)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read response body for logging");
            (Response::from_parts(parts, Body::empty()), None)
        }
    }
}

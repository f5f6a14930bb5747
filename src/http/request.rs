//! Request-side capture helpers.
//!
//! # Responsibilities
//! - Resolve the client address behind proxies
//! - Buffer a bounded request body for capture and hand it on unchanged
//!
//! # Design Decisions
//! - Forwarding headers win over the transport peer address
//! - Chunked bodies are read like sized ones; a body that outgrows the
//!   capture limit is replayed to the handler and logs as null
//! - Body reads share one deadline, the request timeout

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::Request;
use axum::http::HeaderMap;
use futures_util::{stream, StreamExt};
use serde_json::Value;

use crate::audit::capture::CapturePolicy;
use crate::audit::event::UNKNOWN_CLIENT;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Best-effort client address.
///
/// Precedence: first `x-forwarded-for` entry, then `x-real-ip`, then the
/// transport peer, then `"unknown"`.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header(X_REAL_IP) {
        return real_ip.to_string();
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Whether a body's size-hint upper bound is known and within `max_bytes`.
pub(crate) fn fits(upper: Option<u64>, max_bytes: usize) -> bool {
    upper.is_some_and(|upper| upper <= max_bytes as u64)
}

/// The client did not finish sending the body before the deadline.
#[derive(Debug, thiserror::Error)]
#[error("request body not received within {0:?}")]
pub struct BodyReadTimeout(pub Duration);

/// Read the request body for capture and rebuild the request around it.
///
/// Reads frame by frame up to `max_capture_bytes`. Past that the buffered
/// frames are chained in front of the unread rest, so the handler still sees
/// the whole body. A read error is replayed the same way. Only a body that
/// stalls past `read_timeout` fails the request.
pub async fn capture_request_body(
    request: Request,
    policy: &CapturePolicy,
    read_timeout: Duration,
) -> Result<(Request, Option<Value>), BodyReadTimeout> {
    if request.body().size_hint().lower() > policy.max_capture_bytes as u64 {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let mut frames = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0usize;
    let deadline = tokio::time::Instant::now() + read_timeout;

    loop {
        let next = tokio::time::timeout_at(deadline, frames.next())
            .await
            .map_err(|_| BodyReadTimeout(read_timeout))?;

        match next {
            Some(Ok(chunk)) => {
                size += chunk.len();
                chunks.push(chunk);
                if size > policy.max_capture_bytes {
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(frames);
                    return Ok((Request::from_parts(parts, Body::from_stream(replay)), None));
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read request body for logging");
                let replay = chunks.into_iter().map(Ok).chain(std::iter::once(Err(e)));
                let body = Body::from_stream(stream::iter(replay));
                return Ok((Request::from_parts(parts, body), None));
            }
            None => break,
        }
    }

    let bytes = Bytes::from(chunks.concat());
    let captured = policy.request_body(&bytes);
    Ok((Request::from_parts(parts, Body::from(bytes)), captured))
}

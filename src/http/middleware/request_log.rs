//! Request-logging middleware (the publisher side of the audit pipeline).
//!
//! Runs the downstream handler first, then builds one `RequestLogEvent` from
//! the request and the finished response and publishes it. Publishing never
//! changes the response.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::audit::event::RequestLogEvent;
use crate::http::error::ApiError;
use crate::http::request::{capture_request_body, client_address, X_REQUEST_ID};
use crate::http::response::{capture_response_body, error_message};
use crate::http::server::AppState;
use crate::observability::metrics;

pub async fn request_log_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let policy = state.capture.as_ref();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request
        .uri()
        .query()
        .filter(|q| !q.is_empty())
        .map(str::to_string);
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_address = client_address(request.headers(), peer);
    let headers = policy.limit(policy.headers(request.headers()));

    let read_timeout = Duration::from_secs(state.config.timeouts.request_secs);
    let (response, request_body) = if method == Method::GET {
        (next.run(request).await, None)
    } else {
        match capture_request_body(request, policy, read_timeout).await {
            Ok((request, request_body)) => (next.run(request).await, request_body),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Request body read timed out");
                let timeout = ApiError::RequestTimeout("Request body not received in time");
                (timeout.into_response(), None)
            }
        }
    };

    let status = response.status();
    let error = error_message(&response);
    let (response, response_body) = capture_response_body(response, policy).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let event = RequestLogEvent {
        method: method.to_string(),
        resource_id: policy.resource_id(&path),
        path,
        query,
        client_address,
        headers,
        status_code: status.as_u16(),
        error,
        duration_ms,
        request_body,
        response_body,
    };

    if !state.channel.publish(&event).await {
        tracing::warn!(
            request_id = %request_id,
            method = %event.method,
            path = %event.path,
            "Request log not published"
        );
    }
    metrics::record_request(method.as_str(), status.as_u16(), start);

    response
}

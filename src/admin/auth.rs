//! Admin API authentication.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::error::ApiError;
use crate::http::server::AppState;

pub const X_API_KEY: &str = "x-api-key";

/// Require `x-api-key` to match the configured admin key.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(X_API_KEY)
        .and_then(|h| h.to_str().ok());

    match provided {
        None => ApiError::Unauthorized("API key required").into_response(),
        Some(key) if !keys_match(key.as_bytes(), state.config.admin.api_key.as_bytes()) => {
            tracing::warn!("Rejected request with invalid API key");
            ApiError::Unauthorized("Invalid API key").into_response()
        }
        Some(_) => next.run(request).await,
    }
}

/// Compare keys without stopping at the first differing byte.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

//! Admin API: the authenticated `/request-logs` endpoints.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/request-logs", get(list_request_logs))
        .route("/request-logs/count", get(count_request_logs))
        .route(
            "/request-logs/resource/{resource_id}",
            get(list_request_logs_by_resource),
        )
        .route(
            "/request-logs/{log_id}",
            get(get_request_log).delete(delete_request_log),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

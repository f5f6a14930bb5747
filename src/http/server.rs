//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: health, admin API and application routes
//! - Wire up middleware (request logging, timeout, body limit, tracing,
//!   request ID)
//! - Serve on a listener until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::handlers::get_health;
use crate::admin::setup_admin_router;
use crate::audit::capture::CapturePolicy;
use crate::audit::processor::RequestLogProcessor;
use crate::audit::store::RequestLogStore;
use crate::channel::LogChannel;
use crate::config::AppConfig;
use crate::http::middleware::request_log_middleware;

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub channel: Arc<LogChannel>,
    pub store: Arc<dyn RequestLogStore>,
    pub processor: Arc<RequestLogProcessor>,
    pub capture: Arc<CapturePolicy>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        channel: Arc<LogChannel>,
        store: Arc<dyn RequestLogStore>,
        processor: Arc<RequestLogProcessor>,
        capture: Arc<CapturePolicy>,
    ) -> Self {
        Self {
            config,
            channel,
            store,
            processor,
            capture,
        }
    }
}

/// HTTP server for the relief backend.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server exposing only the built-in routes.
    pub fn new(state: AppState) -> Self {
        Self::with_routes(state, Router::new())
    }

    /// Create a server that also serves `routes`, all behind the request-log
    /// middleware.
    pub fn with_routes(state: AppState, routes: Router) -> Self {
        Self {
            router: Self::build_router(state, routes),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, routes: Router) -> Router {
        let config = state.config.clone();

        let mut router = Router::new()
            .route("/health", get(get_health))
            .with_state(state.clone())
            .merge(setup_admin_router(state.clone()))
            .merge(routes)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        if config.request_log.enabled {
            router = router.layer(middleware::from_fn_with_state(state, request_log_middleware));
        }

        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

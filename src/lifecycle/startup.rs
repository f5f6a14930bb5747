//! Startup orchestration.
//!
//! `Application` is the composition root: it builds the transport, store,
//! log channel, processor and HTTP server from configuration and owns them
//! for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::audit::capture::CapturePolicy;
use crate::audit::memory::InMemoryRequestLogStore;
use crate::audit::postgres::PgRequestLogStore;
use crate::audit::processor::RequestLogProcessor;
use crate::audit::store::{RequestLogStore, StoreError};
use crate::channel::{ChannelError, LogChannel, MemoryTransport, PubSubTransport, RedisTransport};
use crate::config::{AppConfig, ChannelBackend, ChannelConfig, DatabaseBackend, DatabaseConfig};
use crate::http::server::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("log channel setup failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("request log store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Build the configured pub/sub transport.
pub fn build_transport(config: &ChannelConfig) -> Result<Arc<dyn PubSubTransport>, ChannelError> {
    match config.backend {
        ChannelBackend::Redis => {
            let transport = RedisTransport::new(&config.redis_url())?;
            tracing::info!(host = %config.host, port = config.port, db = config.db, "Using Redis log channel");
            Ok(Arc::new(transport))
        }
        ChannelBackend::Memory => {
            tracing::warn!("Using in-memory log channel; events never leave this process");
            Ok(Arc::new(MemoryTransport::new()))
        }
    }
}

/// Handle on the store; the Postgres variant is kept to close its pool.
enum StoreHandle {
    Postgres(Arc<PgRequestLogStore>),
    Memory(Arc<InMemoryRequestLogStore>),
}

impl StoreHandle {
    fn as_store(&self) -> Arc<dyn RequestLogStore> {
        match self {
            StoreHandle::Postgres(store) => store.clone(),
            StoreHandle::Memory(store) => store.clone(),
        }
    }

    async fn close(&self) {
        if let StoreHandle::Postgres(store) = self {
            store.close().await;
        }
    }
}

async fn build_store(config: &DatabaseConfig) -> Result<StoreHandle, StoreError> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let store = PgRequestLogStore::connect(config).await?;
            store.ensure_schema().await?;
            Ok(StoreHandle::Postgres(Arc::new(store)))
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory request log store; records are lost on exit");
            Ok(StoreHandle::Memory(Arc::new(InMemoryRequestLogStore::new())))
        }
    }
}

/// The assembled backend.
pub struct Application {
    state: AppState,
    server: HttpServer,
    store: Option<StoreHandle>,
}

impl Application {
    /// Build every component from configuration.
    pub async fn build(config: AppConfig) -> Result<Self, StartupError> {
        Self::build_with_routes(config, Router::new()).await
    }

    /// Build from configuration, serving `routes` behind the request-log
    /// middleware.
    pub async fn build_with_routes(config: AppConfig, routes: Router) -> Result<Self, StartupError> {
        let transport = build_transport(&config.channel)?;
        let store = build_store(&config.database).await?;

        let mut app = Self::from_parts(config, transport, store.as_store(), routes);
        app.store = Some(store);
        Ok(app)
    }

    /// Assemble around an existing transport and store.
    pub fn from_parts(
        config: AppConfig,
        transport: Arc<dyn PubSubTransport>,
        store: Arc<dyn RequestLogStore>,
        routes: Router,
    ) -> Self {
        let config = Arc::new(config);
        let channel = Arc::new(LogChannel::new(transport, config.channel.topic.clone()));
        let capture = Arc::new(CapturePolicy::from_config(&config.request_log));
        let processor = Arc::new(RequestLogProcessor::new(
            channel.clone(),
            store.clone(),
            capture.clone(),
            Duration::from_secs(config.processor.shutdown_timeout_secs),
        ));

        let state = AppState::new(config, channel, store, processor, capture);
        let server = HttpServer::with_routes(state.clone(), routes);

        Self {
            state,
            server,
            store: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The layered router, for in-process requests.
    pub fn router(&self) -> Router {
        self.server.router()
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, StartupError> {
        let address = self.state.config.listener.bind_address.clone();
        TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })
    }

    /// Start the processor, serve until `shutdown` fires, then stop the
    /// processor and release connections.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        let Application {
            state,
            server,
            store,
        } = self;
        let shutdown_rx = shutdown.subscribe();

        state.processor.start().await;

        let served = server.run(listener, shutdown_rx).await;
        if let Err(e) = &served {
            tracing::error!(error = %e, "HTTP server failed");
        }

        state.processor.stop().await;
        if let Some(store) = store {
            store.close().await;
        }

        tracing::info!("Shutdown complete");
        served.map_err(StartupError::from)
    }
}

/// Verify the configured channel and store are reachable.
pub async fn check_connectivity(config: &AppConfig) -> Result<(), StartupError> {
    let transport = build_transport(&config.channel)?;
    transport.connect().await?;
    transport.close().await;
    tracing::info!("Log channel reachable");

    let store = build_store(&config.database).await?;
    let pinged = store.as_store().ping().await;
    store.close().await;
    pinged?;
    tracing::info!("Request log store reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.channel.backend = ChannelBackend::Memory;
        config.database.backend = DatabaseBackend::Memory;
        config.listener.bind_address = "127.0.0.1:0".into();
        config
    }

    #[tokio::test]
    async fn test_check_connectivity_with_memory_backends() {
        assert!(check_connectivity(&memory_config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_postgres_without_url_fails_to_build() {
        let mut config = memory_config();
        config.database.backend = DatabaseBackend::Postgres;
        config.database.url = None;
        assert!(matches!(
            Application::build(config).await,
            Err(StartupError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_processor_on_shutdown() {
        let app = Application::build(memory_config()).await.unwrap();
        let state = app.state().clone();
        let listener = app.bind().await.unwrap();
        let shutdown = Shutdown::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(listener, &shutdown).await })
        };

        for _ in 0..50 {
            if state.processor.is_consuming() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(state.channel.is_connected());

        shutdown.trigger();
        handle.await.unwrap().unwrap();
        assert!(!state.processor.is_consuming());
        assert!(!state.channel.is_connected());
    }
}

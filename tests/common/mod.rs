//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use relief_backend::audit::{InMemoryRequestLogStore, RequestLogRecord};
use relief_backend::channel::MemoryTransport;
use relief_backend::config::{AppConfig, ChannelBackend, DatabaseBackend};
use relief_backend::http::AppState;
use relief_backend::lifecycle::{Application, Shutdown, StartupError};

pub const API_KEY: &str = "test-admin-key";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.channel.backend = ChannelBackend::Memory;
    config.database.backend = DatabaseBackend::Memory;
    config.admin.api_key = API_KEY.into();
    config.processor.shutdown_timeout_secs = 5;
    config
}

/// Stand-ins for the relief resource endpoints the middleware wraps.
pub fn demo_routes() -> Router {
    Router::new()
        .route(
            "/supplies",
            post(|Json(body): Json<Value>| async move {
                let name = body.get("name").cloned().unwrap_or(Value::Null);
                (StatusCode::CREATED, Json(json!({ "id": "sup-1", "name": name })))
            }),
        )
        .route(
            "/shelters/{id}",
            get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                Json(json!({ "id": id, "name": "North Shelter" }))
            }),
        )
        .route(
            "/reports",
            post(|body: String| async move { (StatusCode::ACCEPTED, body) }),
        )
        .route(
            "/broken",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR.into_response() }),
        )
}

/// A running backend on an ephemeral port with in-memory channel and store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub transport: Arc<MemoryTransport>,
    pub store: Arc<InMemoryRequestLogStore>,
    pub state: AppState,
    pub shutdown: Shutdown,
    pub client: reqwest::Client,
    handle: JoinHandle<Result<(), StartupError>>,
}

pub fn build_app(config: AppConfig) -> (Application, Arc<MemoryTransport>, Arc<InMemoryRequestLogStore>) {
    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(InMemoryRequestLogStore::new());
    let app = Application::from_parts(config, transport.clone(), store.clone(), demo_routes());
    (app, transport, store)
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let (app, transport, store) = build_app(config);
    let state = app.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run(listener, &shutdown).await })
    };

    wait_until(|| state.processor.is_consuming()).await;

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestApp {
        addr,
        transport,
        store,
        state,
        shutdown,
        client,
        handle,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until the store holds `count` records, oldest first.
    pub async fn records(&self, count: usize) -> Vec<RequestLogRecord> {
        let store = self.store.clone();
        wait_until(move || store.len() >= count).await;
        self.store.records()
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

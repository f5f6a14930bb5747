//! Relief backend (request-audit pipeline)
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ request-log middleware ──▶ handler
//!                                            │
//!                                            │ RequestLogEvent (JSON)
//!                                            ▼
//!                                   log channel (Redis pub/sub, "request_logs")
//!                                            │
//!                                            ▼
//!                                   background processor ──▶ request_logs table
//!                                                                  │
//!     Admin client ──▶ /request-logs (x-api-key) ◀─────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use relief_backend::audit::RequestLogEvent;
use relief_backend::channel::{EventHandler, LogChannel};
use relief_backend::config::{load_config, AppConfig};
use relief_backend::lifecycle::{signals, startup, Application, Shutdown};
use relief_backend::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "relief-backend")]
#[command(about = "Relief backend with request audit logging", version)]
struct Cli {
    /// Path to a TOML config file. Defaults plus environment apply without one.
    #[arg(short, long, env = "RELIEF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP server and the background processor
    Serve,
    /// Verify log channel and database connectivity
    Check,
    /// Print every event published on the log channel
    Monitor,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("Logging setup failed: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => startup::check_connectivity(&config).await.map_err(Into::into),
        Command::Monitor => monitor(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relief-backend starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        channel = ?config.channel.backend,
        database = ?config.database.backend,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = Application::build(config).await?;
    let listener = app.bind().await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    app.run(listener, &shutdown).await?;
    Ok(())
}

struct PrintHandler;

#[async_trait]
impl EventHandler for PrintHandler {
    async fn handle(&self, event: RequestLogEvent) {
        println!(
            "{} {} -> {} ({} ms) from {}",
            event.method, event.path, event.status_code, event.duration_ms, event.client_address
        );
    }
}

async fn monitor(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transport = startup::build_transport(&config.channel)?;
    let channel = LogChannel::new(transport, config.channel.topic.clone());

    channel.connect().await;
    if !channel.is_connected() {
        return Err("log channel unreachable".into());
    }
    let subscription = channel.subscribe().await?;
    tracing::info!(topic = %channel.topic(), "Monitoring log channel, Ctrl+C to stop");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            signals::wait_for_signal().await;
            cancel.cancel();
        }
    });

    subscription.dispatch(&PrintHandler, &cancel).await;
    channel.disconnect().await;
    Ok(())
}

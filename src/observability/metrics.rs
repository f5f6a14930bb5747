//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relief_request_log_publish_total` (counter): publish attempts by outcome
//! - `relief_request_log_persist_total` (counter): consumed events by outcome
//!   (`persisted`, `failed`, `malformed`)
//! - `relief_http_request_duration_seconds` (histogram): latency by method, status

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_publish(outcome: &'static str) {
    metrics::counter!("relief_request_log_publish_total", "outcome" => outcome).increment(1);
}

pub fn record_persist(outcome: &'static str) {
    metrics::counter!("relief_request_log_persist_total", "outcome" => outcome).increment(1);
}

/// Count a message dropped before reaching the store.
pub fn record_consume(outcome: &'static str) {
    record_persist(outcome);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::histogram!(
        "relief_http_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

//! Relief backend request-audit pipeline.
//!
//! Every HTTP request is captured by middleware, published to a pub/sub log
//! channel and persisted by a background processor; an authenticated admin
//! API reads the resulting audit trail.

pub mod admin;
pub mod audit;
pub mod channel;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::{Application, Shutdown};

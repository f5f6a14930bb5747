//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → middleware/request_log.rs (start timer, capture request)
//!         → request.rs (client address, bounded body capture)
//!     → handler (admin API or application route)
//!     → response.rs (error detail, bounded body capture)
//!     → publish RequestLogEvent, send response to client
//! ```

pub mod error;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use error::ApiError;
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → transport, store, channel, processor, HTTP server
//!     → start processor → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain requests
//!     → stop processor → disconnect channel → close store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: store first, processor before listeners
//! - The processor stops only after the server has drained
//! - Processor shutdown has a deadline; the consume task is aborted past it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Application, StartupError};

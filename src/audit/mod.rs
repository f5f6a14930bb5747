//! Request audit subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request/response
//!     → capture.rs (headers, bodies, resource id; sanitized and size-limited)
//!     → event.rs (RequestLogEvent, the channel payload)
//!     → [log channel]
//!     → processor.rs (consume task, one event at a time)
//!     → store.rs (RequestLogStore: postgres.rs / memory.rs)
//! ```
//!
//! # Design Decisions
//! - Capture never fails a request; anything unreadable becomes null
//! - One insert per event, each in its own transaction
//! - The processor is the only writer; the admin API only reads and deletes

pub mod capture;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod processor;
pub mod store;

pub use capture::CapturePolicy;
pub use event::{RequestLogEvent, RequestLogRecord};
pub use memory::InMemoryRequestLogStore;
pub use postgres::PgRequestLogStore;
pub use processor::{ProcessorState, RequestLogProcessor};
pub use store::{Page, RequestLogFilter, RequestLogStore, StoreError};

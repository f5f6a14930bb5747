//! Persistence store abstraction for the audit trail.
//!
//! # Responsibilities
//! - Insert one record per consumed event as its own unit of work
//! - Filtered, paginated retrieval for the admin endpoints
//! - Lookup and delete by id
//!
//! # Design Decisions
//! - Async trait so Postgres and in-memory stores are interchangeable
//! - Stores never share a transaction across calls

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::event::RequestLogRecord;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Optional filters for listing and counting records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestLogFilter {
    /// HTTP method, compared case-insensitively.
    pub method: Option<String>,
    pub status_code: Option<i32>,
    /// Substring of the request path.
    pub path: Option<String>,
    /// Exact client address.
    pub ip: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end_date: Option<DateTime<Utc>>,
}

impl RequestLogFilter {
    /// Whether a record passes every set filter.
    pub fn matches(&self, record: &RequestLogRecord) -> bool {
        if let Some(method) = &self.method {
            if !record.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(status) = self.status_code {
            if record.status_code != status {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if !record.path.to_lowercase().contains(&path.to_lowercase()) {
                return false;
            }
        }
        if let Some(ip) = &self.ip {
            if &record.client_address != ip {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if record.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if record.created_at > end {
                return false;
            }
        }
        true
    }
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}

/// Durable storage for request-log records.
#[async_trait]
pub trait RequestLogStore: Send + Sync {
    /// Insert one record in its own committed unit of work.
    async fn insert(&self, record: RequestLogRecord) -> Result<RequestLogRecord, StoreError>;

    /// Records matching `filter`, newest first.
    async fn list(
        &self,
        filter: &RequestLogFilter,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError>;

    async fn count(&self, filter: &RequestLogFilter) -> Result<u64, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RequestLogRecord>, StoreError>;

    /// Records whose `resource_id` equals `resource_id`, newest first.
    async fn list_by_resource(
        &self,
        resource_id: &str,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError>;

    /// Returns `false` when no record had that id.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;
}

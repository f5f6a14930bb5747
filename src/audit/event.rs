//! Request-log event and record types.
//!
//! `RequestLogEvent` is the only payload shape on the log channel; the
//! publisher serializes it and the subscriber deserializes it, so both sides
//! share one contract. `RequestLogRecord` is its persisted form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Client address recorded when no source resolves.
pub const UNKNOWN_CLIENT: &str = "unknown";

fn unknown_client() -> String {
    UNKNOWN_CLIENT.to_string()
}

fn empty_headers() -> Value {
    Value::Object(Default::default())
}

/// One HTTP request/response cycle, in flight on the log channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEvent {
    pub method: String,

    /// Request path without the query string.
    pub path: String,

    /// Raw query string, `None` when the request had none.
    #[serde(default)]
    pub query: Option<String>,

    #[serde(default = "unknown_client")]
    pub client_address: String,

    /// Header name → value with credential headers removed, or a truncation marker.
    #[serde(default = "empty_headers")]
    pub headers: Value,

    pub status_code: u16,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub request_body: Option<Value>,

    #[serde(default)]
    pub response_body: Option<Value>,

    /// Second path segment under a known resource collection.
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl RequestLogEvent {
    /// Serialize for the channel.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a channel payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Durable audit-trail row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestLogRecord {
    pub id: Uuid,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub client_address: String,
    pub headers: Value,
    pub status_code: i32,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub request_body: Option<Value>,
    pub response_body: Option<Value>,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequestLogRecord {
    /// Build a record from a received event with a fresh id and timestamp.
    pub fn from_event(event: RequestLogEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: event.method,
            path: event.path,
            query: event.query,
            client_address: event.client_address,
            headers: event.headers,
            status_code: i32::from(event.status_code),
            error: event.error,
            duration_ms: i64::try_from(event.duration_ms).unwrap_or(i64::MAX),
            request_body: event.request_body,
            response_body: event.response_body,
            resource_id: event.resource_id,
            created_at: Utc::now(),
        }
    }
}

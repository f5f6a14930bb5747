//! Capture policy: what the request-logging middleware keeps.
//!
//! # Responsibilities
//! - Drop credential-bearing headers
//! - Strip sensitive keys from JSON bodies
//! - Cap captured values at a maximum serialized size
//! - Derive the resource id from the request path

use axum::http::HeaderMap;
use serde_json::{json, Map, Value};

use crate::audit::event::RequestLogEvent;
use crate::config::RequestLogConfig;

/// Lower-cased view of `RequestLogConfig`, built once and shared by requests.
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    pub max_field_size: usize,
    pub max_capture_bytes: usize,
    sensitive_body_keys: Vec<String>,
    excluded_headers: Vec<String>,
    resource_collections: Vec<String>,
}

impl CapturePolicy {
    pub fn from_config(config: &RequestLogConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_ascii_lowercase()).collect()
        };
        Self {
            max_field_size: config.max_field_size,
            max_capture_bytes: config.max_capture_bytes,
            sensitive_body_keys: lower(&config.sensitive_body_keys),
            excluded_headers: lower(&config.excluded_headers),
            resource_collections: config.resource_collections.clone(),
        }
    }

    /// Header map as a JSON object, without excluded headers.
    ///
    /// Repeated headers are joined with `", "`; values that are not visible
    /// ASCII are decoded lossily.
    pub fn headers(&self, headers: &HeaderMap) -> Value {
        let mut out = Map::new();
        for (name, value) in headers {
            let name = name.as_str();
            if self.excluded_headers.iter().any(|h| h == name) {
                continue;
            }
            let value = match value.to_str() {
                Ok(v) => v.to_string(),
                Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
            };
            match out.get_mut(name) {
                Some(Value::String(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                _ => {
                    out.insert(name.to_string(), Value::String(value));
                }
            }
        }
        Value::Object(out)
    }

    /// Drop excluded headers from an already captured header object.
    pub fn strip_headers(&self, headers: Value) -> Value {
        match headers {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(name, _)| {
                        let name = name.to_ascii_lowercase();
                        !self.excluded_headers.iter().any(|h| *h == name)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Apply every capture rule to an event read from the log channel.
    ///
    /// Any publisher may write to the topic; stored records always satisfy
    /// the capture rules.
    pub fn sanitize(&self, mut event: RequestLogEvent) -> RequestLogEvent {
        event.headers = self.limit(self.strip_headers(event.headers));
        event.request_body = event
            .request_body
            .map(|body| self.limit(self.strip_sensitive(body)));
        event.response_body = event.response_body.map(|body| self.limit(body));
        event
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.sensitive_body_keys.iter().any(|s| key.contains(s.as_str()))
    }

    /// Remove sensitive keys at every nesting level.
    pub fn strip_sensitive(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(k, _)| !self.is_sensitive(k))
                    .map(|(k, v)| (k, self.strip_sensitive(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.strip_sensitive(v)).collect())
            }
            other => other,
        }
    }

    /// Parse a request body and strip sensitive keys. Empty or non-JSON → `None`.
    pub fn request_body(&self, bytes: &[u8]) -> Option<Value> {
        parse_json(bytes).map(|v| self.limit(self.strip_sensitive(v)))
    }

    /// Parse a response body. Empty or non-JSON → `None`.
    pub fn response_body(&self, bytes: &[u8]) -> Option<Value> {
        parse_json(bytes).map(|v| self.limit(v))
    }

    /// Replace a value whose serialized form exceeds `max_field_size`
    /// characters with `{"truncated": true, "size": N}`.
    pub fn limit(&self, value: Value) -> Value {
        limit_size(value, self.max_field_size)
    }

    /// Second path segment when the first one names a resource collection.
    pub fn resource_id(&self, path: &str) -> Option<String> {
        let mut parts = path.trim_matches('/').split('/');
        let collection = parts.next()?;
        let id = parts.next()?;
        if id.is_empty() || !self.resource_collections.iter().any(|c| c == collection) {
            return None;
        }
        Some(id.to_string())
    }
}

fn parse_json(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}

/// Size-cap a JSON value; see [`CapturePolicy::limit`].
pub fn limit_size(value: Value, max_size: usize) -> Value {
    let size = serialized_len(&value);
    if size > max_size {
        json!({ "truncated": true, "size": size })
    } else {
        value
    }
}

fn serialized_len(value: &Value) -> usize {
    value.to_string().chars().count()
}

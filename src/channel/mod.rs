//! Log channel subsystem.
//!
//! # Data Flow
//! ```text
//! request-log middleware (many requests)
//!     → LogChannel::publish (serialize RequestLogEvent)
//!     → PubSubTransport (redis_pubsub.rs / memory.rs)
//!     → fixed topic ("request_logs")
//!     → Subscription::dispatch (decode, one handler call at a time)
//!     → EventHandler (background processor)
//! ```
//!
//! # Design Decisions
//! - One shared `LogChannel` built by the composition root
//! - `connect` and `publish` never raise; failures are logged and reported
//!   through the connected flag or a `false` return
//! - No reconnection on publish; the processor owns the connection lifecycle
//! - Cancellation is only observed while waiting for the next message

pub mod memory;
pub mod redis_pubsub;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::audit::event::RequestLogEvent;
use crate::observability::metrics;

pub use memory::MemoryTransport;
pub use redis_pubsub::RedisTransport;
pub use transport::{ChannelError, MessageStream, PubSubTransport};

/// Receives decoded events from a [`Subscription`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: RequestLogEvent);
}

/// Named topic over a pub/sub transport.
pub struct LogChannel {
    transport: Arc<dyn PubSubTransport>,
    topic: String,
    connected: AtomicBool,
}

impl LogChannel {
    pub fn new(transport: Arc<dyn PubSubTransport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection. Failure leaves the channel disconnected.
    pub async fn connect(&self) {
        match self.transport.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(topic = %self.topic, "Connected to log channel");
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                tracing::error!(topic = %self.topic, error = %e, "Failed to connect to log channel");
            }
        }
    }

    /// Close the connection. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.transport.close().await;
            tracing::info!(topic = %self.topic, "Disconnected from log channel");
        }
    }

    /// Serialize and send one event. Returns whether the transport accepted it.
    pub async fn publish(&self, event: &RequestLogEvent) -> bool {
        if !self.is_connected() {
            tracing::error!(topic = %self.topic, "Log channel not connected, cannot publish");
            metrics::record_publish("not_connected");
            return false;
        }

        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize request log");
                metrics::record_publish("failed");
                return false;
            }
        };

        match self.transport.publish(&self.topic, payload).await {
            Ok(()) => {
                tracing::debug!(topic = %self.topic, "Published request log");
                metrics::record_publish("published");
                true
            }
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "Failed to publish request log");
                metrics::record_publish("failed");
                false
            }
        }
    }

    /// Subscribe to the topic. The subscription is in effect when this returns.
    pub async fn subscribe(&self) -> Result<Subscription, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let stream = self.transport.subscribe(&self.topic).await?;
        tracing::info!(topic = %self.topic, "Subscribed to log channel");
        Ok(Subscription {
            topic: self.topic.clone(),
            stream,
        })
    }
}

/// Why a dispatch loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// The cancellation token fired while waiting for a message.
    Cancelled,
    /// The transport closed the subscription.
    Closed,
}

/// An active subscription on the log channel.
pub struct Subscription {
    topic: String,
    stream: MessageStream,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Decode each message and hand it to `handler`, awaiting every call
    /// before receiving the next. Malformed payloads are logged and dropped.
    pub async fn dispatch<H>(mut self, handler: &H, cancel: &CancellationToken) -> DispatchEnd
    where
        H: EventHandler + ?Sized,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return DispatchEnd::Cancelled,
                next = self.stream.next() => next,
            };

            let payload = match next {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    tracing::error!(topic = %self.topic, error = %e, "Error receiving message");
                    continue;
                }
                None => {
                    tracing::warn!(topic = %self.topic, "Log channel subscription closed");
                    return DispatchEnd::Closed;
                }
            };

            match RequestLogEvent::from_payload(&payload) {
                Ok(event) => handler.handle(event).await,
                Err(e) => {
                    tracing::error!(topic = %self.topic, error = %e, "Dropping malformed request log message");
                    metrics::record_consume("malformed");
                }
            }
        }
    }
}

//! In-process pub/sub transport over `tokio::sync::broadcast`.
//!
//! Same delivery contract as Redis: at-most-once to every live subscriber,
//! nothing retained for late subscribers. It can be marked unavailable to
//! simulate an outage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::channel::transport::{ChannelError, MessageStream, PubSubTransport};

const DEFAULT_CAPACITY: usize = 1024;

pub struct MemoryTransport {
    topics: DashMap<String, broadcast::Sender<String>>,
    available: AtomicBool,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is the per-topic backlog a slow subscriber may fall behind by.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
            capacity,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), ChannelError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Unavailable("in-memory transport marked unavailable".into()))
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), ChannelError> {
        self.check_available()
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        self.check_available()?;
        // No receivers is fine: the message is simply not delivered.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        self.check_available()?;
        let rx = self.sender(topic).subscribe();

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((Ok::<_, ChannelError>(payload), rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "In-memory subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn close(&self) {}
}

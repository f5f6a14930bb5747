//! Pub/sub transport abstraction.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Raw payloads received on a subscribed topic.
pub type MessageStream = BoxStream<'static, Result<String, ChannelError>>;

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("log channel is not connected")]
    NotConnected,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connect/publish/subscribe against an underlying pub/sub system.
///
/// Implementations serialize access to their own connections; callers may
/// share one transport across tasks.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Establish (or re-establish) the publishing connection.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Send one payload to `topic`. Delivery to zero subscribers is not an error.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError>;

    /// Open a subscription on `topic`. Dropping the stream unsubscribes.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError>;

    /// Release the publishing connection.
    async fn close(&self);
}

//! Redis PUBLISH/SUBSCRIBE transport.
//!
//! Publishing shares one multiplexed connection; every subscription opens a
//! dedicated pub/sub connection, which is closed when its stream is dropped.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::channel::transport::{ChannelError, MessageStream, PubSubTransport};

pub struct RedisTransport {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisTransport {
    /// Create a transport for `url` (`redis://[user:pass@]host:port/db`).
    /// No connection is made until [`PubSubTransport::connect`].
    pub fn new(url: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: RwLock::new(None),
        })
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn connect(&self) -> Result<(), ChannelError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::debug!(reply = %pong, "Redis answered PING");

        *self.connection.write().await = Some(conn);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let mut conn = self
            .connection
            .read()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        let receivers: i64 = conn.publish(topic, payload).await?;
        tracing::trace!(topic, receivers, "Published to redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(ChannelError::from))
            .boxed();
        Ok(stream)
    }

    async fn close(&self) {
        self.connection.write().await.take();
    }
}

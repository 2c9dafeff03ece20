//! Redis-backed connector.

use super::{Connector, PublishConnection, RawMessage, SubscribeConnection};
use crate::error::ChannelResult;
use async_trait::async_trait;
use channels_common::{redact_url, RedisConfig};
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client};

/// Connection factory over a `redis::Client`
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl RedisConnector {
    /// Wrap an existing client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a connector for a Redis URL (e.g., `redis://localhost:6379`)
    ///
    /// No connection is made until a handle calls `connect()`.
    pub fn open(url: &str) -> ChannelResult<Self> {
        let client = Client::open(url)?;
        tracing::debug!(url = %redact_url(url), "Redis connector created");
        Ok(Self { client })
    }

    /// Create a connector from channels-common config
    pub fn from_config(config: &RedisConfig) -> ChannelResult<Self> {
        Self::open(&config.url)
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect_publisher(&self) -> ChannelResult<Box<dyn PublishConnection>> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisPublishConnection { conn }))
    }

    async fn connect_subscriber(&self) -> ChannelResult<Box<dyn SubscribeConnection>> {
        let pubsub = self.client.get_async_pubsub().await?;
        Ok(Box::new(RedisSubscribeConnection { pubsub }))
    }
}

/// `PUBLISH` over a multiplexed connection; pub/sub mode connections cannot publish
struct RedisPublishConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl PublishConnection for RedisPublishConnection {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> ChannelResult<u32> {
        let mut conn = self.conn.clone();
        let receivers: u32 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn close(&self) {
        // The multiplexed driver shuts down once the last clone is dropped.
    }
}

struct RedisSubscribeConnection {
    pubsub: PubSub,
}

#[async_trait]
impl SubscribeConnection for RedisSubscribeConnection {
    async fn subscribe(&mut self, channels: &[String]) -> ChannelResult<()> {
        self.pubsub.subscribe(channels.to_vec()).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> ChannelResult<()> {
        self.pubsub.unsubscribe(channels.to_vec()).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<RawMessage> {
        // A fresh stream per call; undelivered messages stay queued in the
        // connection, so dropping a pending call loses nothing.
        let msg = self.pubsub.on_message().next().await?;
        Some(RawMessage::new(
            msg.get_channel_name(),
            msg.get_payload_bytes().to_vec(),
        ))
    }

    async fn close(&mut self) {
        // Dropping the PubSub closes the socket; nothing to flush.
    }
}

//! Publisher handle.
//!
//! Publishes codec-encoded values to Redis channels over a single connection.

use crate::codec::{BytesCodec, Codec};
use crate::connection::{Connector, PublishConnection, RedisConnector};
use crate::error::{ChannelError, ChannelResult};
use crate::pubsub::ConnectionState;
use std::sync::Arc;
use tokio::sync::RwLock;

enum PublisherState {
    Uninitialized,
    Connected(Arc<dyn PublishConnection>),
    Closed,
}

impl PublisherState {
    fn as_state(&self) -> ConnectionState {
        match self {
            Self::Uninitialized => ConnectionState::Uninitialized,
            Self::Connected(_) => ConnectionState::Connected,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Publisher handle
///
/// ```ignore
/// let publisher = PubChannel::builder()
///     .redis_url("redis://127.0.0.1:6379")?
///     .codec(StringCodec)
///     .build()?;
/// publisher.connect().await?;
/// let receivers = publisher.publish("test:channel", &"PING".to_string()).await?;
/// ```
pub struct PubChannel<T> {
    client: Arc<dyn Connector>,
    codec: Arc<dyn Codec<T>>,
    state: RwLock<PublisherState>,
}

impl PubChannel<Vec<u8>> {
    /// Builder with the raw bytes codec preselected
    #[must_use]
    pub fn builder() -> PubChannelBuilder<Vec<u8>> {
        PubChannelBuilder::new()
    }
}

impl<T: 'static> PubChannel<T> {
    /// Open the underlying connection
    pub async fn connect(&self) -> ChannelResult<()> {
        let mut state = self.state.write().await;
        match *state {
            PublisherState::Connected(_) => return Err(ChannelError::AlreadyConnected),
            PublisherState::Closed => return Err(ChannelError::Closed),
            PublisherState::Uninitialized => {}
        }

        let conn = self.client.connect_publisher().await?;
        *state = PublisherState::Connected(Arc::from(conn));

        tracing::info!("Publisher connected");
        Ok(())
    }

    /// Publish a value, returning the number of subscribers that received it
    ///
    /// The count is a point-in-time figure; delivery is not acknowledged.
    pub async fn publish(&self, channel: &str, value: &T) -> ChannelResult<u32> {
        let conn = match &*self.state.read().await {
            PublisherState::Connected(conn) => Arc::clone(conn),
            PublisherState::Uninitialized => return Err(ChannelError::NotConnected),
            PublisherState::Closed => return Err(ChannelError::Closed),
        };

        let payload = self.codec.encode(value)?;
        let receivers = conn.publish(channel, payload).await?;

        tracing::debug!(
            channel = %channel,
            receivers = receivers,
            "Published message"
        );

        Ok(receivers)
    }

    /// Release the connection. Safe to call repeatedly or before `connect`.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write().await, PublisherState::Closed);

        if let PublisherState::Connected(conn) = previous {
            conn.close().await;
            tracing::info!("Publisher closed");
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.as_state()
    }
}

/// Builder for [`PubChannel`]
pub struct PubChannelBuilder<T> {
    client: Option<Arc<dyn Connector>>,
    codec: Arc<dyn Codec<T>>,
}

impl PubChannelBuilder<Vec<u8>> {
    /// Create a new builder using [`BytesCodec`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            codec: Arc::new(BytesCodec),
        }
    }
}

impl Default for PubChannelBuilder<Vec<u8>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PubChannelBuilder<T> {
    /// Set the connection factory (required)
    #[must_use]
    pub fn client<C: Connector>(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Share a connection factory with other handles
    #[must_use]
    pub fn shared_client(mut self, client: Arc<dyn Connector>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use a Redis server at `url` as the connection factory
    pub fn redis_url(self, url: &str) -> ChannelResult<Self> {
        Ok(self.client(RedisConnector::open(url)?))
    }

    /// Set the value codec, changing the published value type
    #[must_use]
    pub fn codec<U, C: Codec<U>>(self, codec: C) -> PubChannelBuilder<U> {
        PubChannelBuilder {
            client: self.client,
            codec: Arc::new(codec),
        }
    }

    /// Build the publisher; it still has to be connected
    pub fn build(self) -> ChannelResult<PubChannel<T>> {
        let client = self.client.ok_or(ChannelError::MissingConfig("client"))?;

        Ok(PubChannel {
            client,
            codec: self.codec,
            state: RwLock::new(PublisherState::Uninitialized),
        })
    }
}

//! Connection seam between channel handles and the backing server.
//!
//! A [`Connector`] is the connection factory handed to a channel builder. The
//! handles never talk to Redis directly; they go through the connections it
//! opens, which lets the in-process [`MemoryBroker`] stand in for a server.

mod memory;
mod redis_client;

pub use self::memory::{BrokerCommand, MemoryBroker, COMMAND_LOG_CAPACITY};
pub use self::redis_client::RedisConnector;

use crate::error::ChannelResult;
use async_trait::async_trait;

/// Message as delivered by a subscribe connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Undecoded payload
    pub payload: Vec<u8>,
}

impl RawMessage {
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Connection factory
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection able to publish
    async fn connect_publisher(&self) -> ChannelResult<Box<dyn PublishConnection>>;

    /// Open a connection in publish/subscribe mode
    async fn connect_subscriber(&self) -> ChannelResult<Box<dyn SubscribeConnection>>;
}

/// Publishing side of a connection
#[async_trait]
pub trait PublishConnection: Send + Sync {
    /// Publish a payload, returning how many subscribers received it
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> ChannelResult<u32>;

    /// Release the connection
    async fn close(&self);
}

/// Subscribing side of a connection
///
/// `channels` is never empty when the handles call `subscribe`/`unsubscribe`.
#[async_trait]
pub trait SubscribeConnection: Send {
    async fn subscribe(&mut self, channels: &[String]) -> ChannelResult<()>;

    async fn unsubscribe(&mut self, channels: &[String]) -> ChannelResult<()>;

    /// Wait for the next message. Must be cancel-safe; `None` once the
    /// connection has ended.
    async fn next_message(&mut self) -> Option<RawMessage>;

    /// Release the connection
    async fn close(&mut self);
}

//! # channels-pubsub
//!
//! Publisher and subscriber handles over Redis publish/subscribe.
//!
//! ## Features
//!
//! - **Publisher**: `PubChannel<T>` encodes values with a codec and publishes them
//! - **Subscriber**: `SubChannel<T>` keeps one listener per channel and mirrors
//!   the listener set onto the server-side subscription set
//! - **Codecs**: raw bytes (default), UTF-8 strings and JSON
//! - **Connectors**: Redis via the `redis` crate, or an in-process broker for tests
//!
//! ## Example
//!
//! ```ignore
//! use channels_pubsub::{PubChannel, StringCodec, SubChannel};
//!
//! let subscriber = SubChannel::builder()
//!     .redis_url("redis://127.0.0.1:6379")?
//!     .codec(StringCodec)
//!     .build()?;
//! subscriber.connect().await?;
//! subscriber
//!     .sub("test:channel", |channel, message| {
//!         println!("{channel}: {message}");
//!         Ok(())
//!     })
//!     .await?;
//!
//! let publisher = PubChannel::builder()
//!     .redis_url("redis://127.0.0.1:6379")?
//!     .codec(StringCodec)
//!     .build()?;
//! publisher.connect().await?;
//! let receivers = publisher.publish("test:channel", &"PING".to_string()).await?;
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod pubsub;

// Re-export codec types
pub use codec::{BytesCodec, Codec, CodecError, JsonCodec, StringCodec};

// Re-export connection types
pub use connection::{
    BrokerCommand, Connector, MemoryBroker, PublishConnection, RawMessage, RedisConnector,
    SubscribeConnection, COMMAND_LOG_CAPACITY,
};

// Re-export error types
pub use error::{ChannelError, ChannelResult};

// Re-export pubsub types
pub use pubsub::{
    ConnectionState, ListenerResult, PubChannel, PubChannelBuilder, SubChannel, SubChannelBuilder,
    SubscriberConfig,
};

pub use channels_common::ResubscribePolicy;

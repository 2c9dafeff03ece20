//! Error types for channel handles.

use crate::codec::CodecError;

/// Error type for publisher and subscriber operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Channel handle is not connected")]
    NotConnected,

    #[error("Channel handle is already connected")]
    AlreadyConnected,

    #[error("Channel handle is closed")]
    Closed,

    #[error("Channel {0} is already subscribed")]
    AlreadySubscribed(String),

    #[error("Connection task has stopped")]
    ConnectionClosed,
}

impl ChannelError {
    /// Programming errors: the handle was used outside its contract
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingConfig(_)
                | Self::NotConnected
                | Self::AlreadyConnected
                | Self::Closed
                | Self::AlreadySubscribed(_)
        )
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

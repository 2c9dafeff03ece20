//! Configuration structs

mod channels_config;

pub use channels_config::{
    redact_url, ChannelsConfig, ConfigError, RedisConfig, ResubscribePolicy, SubscriberSettings,
};

//! # channels-common
//!
//! Shared utilities for the pub/sub channel crates: configuration loading and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    redact_url, ChannelsConfig, ConfigError, RedisConfig, ResubscribePolicy, SubscriberSettings,
};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};

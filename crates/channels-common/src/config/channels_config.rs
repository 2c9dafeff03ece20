//! Channel configuration structs
//!
//! Loads configuration from environment variables and an optional `.env` file.

use serde::Deserialize;
use std::borrow::Cow;
use std::env;
use std::str::FromStr;

/// Top-level configuration for publisher and subscriber handles
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    pub redis: RedisConfig,
    #[serde(default)]
    pub subscriber: SubscriberSettings,
    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    /// URL with credentials stripped, safe for logging
    #[must_use]
    pub fn redacted_url(&self) -> Cow<'_, str> {
        redact_url(&self.url)
    }
}

/// Subscriber handle settings
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberSettings {
    #[serde(default)]
    pub resubscribe: ResubscribePolicy,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            resubscribe: ResubscribePolicy::default(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// How a subscriber re-issues subscriptions when its channel set changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResubscribePolicy {
    /// Unsubscribe every channel, apply the change, then subscribe every channel again
    #[default]
    Bulk,
    /// Subscribe or unsubscribe only the channel that changed
    Incremental,
}

impl ResubscribePolicy {
    #[must_use]
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::Bulk)
    }
}

impl FromStr for ResubscribePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bulk" => Ok(Self::Bulk),
            "incremental" => Ok(Self::Incremental),
            other => Err(ConfigError::InvalidValue(
                "CHANNELS_RESUBSCRIBE",
                other.to_string(),
            )),
        }
    }
}

// Default value functions
fn default_command_buffer() -> usize {
    32
}

/// Mask the `user:password@` part of a Redis URL, keeping scheme and host
#[must_use]
pub fn redact_url(url: &str) -> Cow<'_, str> {
    let Some((prefix, host)) = url.rsplit_once('@') else {
        return Cow::Borrowed(url);
    };

    match prefix.split_once("://") {
        Some((scheme, _)) => Cow::Owned(format!("{scheme}://***@{host}")),
        None => Cow::Owned(format!("***@{host}")),
    }
}

impl ChannelsConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `REDIS_URL` is missing or a value cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Errors
    /// Same as [`ChannelsConfig::from_env`]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command_buffer = match lookup("CHANNELS_COMMAND_BUFFER") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => return Err(ConfigError::InvalidValue("CHANNELS_COMMAND_BUFFER", raw)),
            },
            None => default_command_buffer(),
        };

        Ok(Self {
            redis: RedisConfig {
                url: lookup("REDIS_URL").ok_or(ConfigError::MissingVar("REDIS_URL"))?,
            },
            subscriber: SubscriberSettings {
                resubscribe: lookup("CHANNELS_RESUBSCRIBE")
                    .map(|s| s.parse())
                    .transpose()?
                    .unwrap_or_default(),
                command_buffer,
            },
            log_json: lookup("LOG_FORMAT")
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

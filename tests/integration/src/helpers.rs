//! Test helpers for integration tests
//!
//! Provides utilities for connecting channel handles to the Redis server named
//! by `REDIS_URL`, generating unique channel names and collecting messages
//! received by listeners.

use std::time::Duration;

use anyhow::Result;
use channels_common::{try_init_tracing_with_config, ChannelsConfig, TracingConfig};
use channels_pubsub::{
    ListenerResult, PubChannel, RedisConnector, StringCodec, SubChannel, SubscriberConfig,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// How long to wait for a listener before failing
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected publisher/subscriber pair using the string codec
pub struct TestChannels {
    pub publisher: PubChannel<String>,
    pub subscriber: SubChannel<String>,
}

impl TestChannels {
    /// Build and connect both handles from the environment config
    pub async fn connect() -> Result<Self> {
        let config = test_config()?;
        Self::connect_with_config(&config).await
    }

    /// Build and connect both handles with a custom config
    pub async fn connect_with_config(config: &ChannelsConfig) -> Result<Self> {
        let _ = try_init_tracing_with_config(TracingConfig::from(config));

        let connector = RedisConnector::from_config(&config.redis)?;

        let publisher = PubChannel::builder()
            .client(connector.clone())
            .codec(StringCodec)
            .build()?;
        publisher.connect().await?;

        let subscriber = SubChannel::builder()
            .client(connector)
            .codec(StringCodec)
            .config(SubscriberConfig::from(&config.subscriber))
            .build()?;
        subscriber.connect().await?;

        Ok(Self {
            publisher,
            subscriber,
        })
    }

    /// Close both handles
    pub async fn close(self) {
        self.subscriber.close().await;
        self.publisher.close().await;
    }
}

/// Collects `(channel, message)` pairs seen by a listener
pub struct Recorder {
    tx: UnboundedSender<(String, String)>,
    rx: UnboundedReceiver<(String, String)>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx }
    }

    /// Listener that forwards every message into this recorder
    pub fn listener(&self) -> impl Fn(&str, String) -> ListenerResult + Send + Sync + 'static {
        let tx = self.tx.clone();
        move |channel, message| {
            tx.send((channel.to_string(), message))?;
            Ok(())
        }
    }

    /// Wait for the next message
    pub async fn next(&mut self) -> Result<(String, String)> {
        tokio::time::timeout(RECEIVE_TIMEOUT, self.rx.recv())
            .await
            .map_err(|_| anyhow::anyhow!("No message within {:?}", RECEIVE_TIMEOUT))?
            .ok_or_else(|| anyhow::anyhow!("Recorder channel closed"))
    }

    /// Assert nothing arrives within `window`
    pub async fn assert_silent(&mut self, window: Duration) -> Result<()> {
        match tokio::time::timeout(window, self.rx.recv()).await {
            Err(_) => Ok(()),
            Ok(message) => anyhow::bail!("Unexpected message: {:?}", message),
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique channel name so parallel tests never share channels
#[must_use]
pub fn unique_channel(prefix: &str) -> String {
    format!("{}:{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Load the test configuration
pub fn test_config() -> Result<ChannelsConfig> {
    // Load from environment or use defaults
    dotenvy::dotenv().ok();

    let config = ChannelsConfig::from_env().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    Ok(config)
}

/// Helper to check if test environment is available
pub async fn check_test_env() -> bool {
    dotenvy::dotenv().ok();

    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("Skipping test: REDIS_URL not set");
        return false;
    };

    match ping(&url).await {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Skipping test: Redis not reachable: {}", e);
            false
        }
    }
}

async fn ping(url: &str) -> Result<()> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    anyhow::ensure!(pong == "PONG", "Unexpected PING reply: {}", pong);
    Ok(())
}

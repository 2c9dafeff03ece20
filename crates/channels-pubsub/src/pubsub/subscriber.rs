//! Subscriber handle.
//!
//! Keeps a channel -> listener map and mirrors its key set onto the Redis
//! subscription set. A background connection task owns the pub/sub
//! connection: it routes inbound messages to listeners and executes
//! subscribe/unsubscribe commands sent by the handle.

use crate::codec::{BytesCodec, Codec};
use crate::connection::{Connector, RedisConnector, SubscribeConnection};
use crate::error::{ChannelError, ChannelResult};
use crate::pubsub::listener::{Dispatcher, Listener, ListenerResult, Registry};
use crate::pubsub::ConnectionState;
use channels_common::{ResubscribePolicy, SubscriberSettings};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// How subscriptions are re-issued when the channel set changes
    pub resubscribe: ResubscribePolicy,
    /// Capacity of the command queue to the connection task
    pub command_buffer: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            resubscribe: ResubscribePolicy::Bulk,
            command_buffer: 32,
        }
    }
}

impl From<&SubscriberSettings> for SubscriberConfig {
    fn from(settings: &SubscriberSettings) -> Self {
        Self {
            resubscribe: settings.resubscribe,
            command_buffer: settings.command_buffer,
        }
    }
}

/// Commands for the connection task
#[derive(Debug)]
enum Command {
    Subscribe {
        channels: Vec<String>,
        reply: oneshot::Sender<ChannelResult<()>>,
    },
    Unsubscribe {
        channels: Vec<String>,
        reply: oneshot::Sender<ChannelResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Sending side of the command queue
#[derive(Clone)]
struct Control {
    tx: mpsc::Sender<Command>,
}

impl Control {
    async fn subscribe(&self, channels: Vec<String>) -> ChannelResult<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { channels, reply }).await?;
        rx.await.map_err(|_| ChannelError::ConnectionClosed)?
    }

    async fn unsubscribe(&self, channels: Vec<String>) -> ChannelResult<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe { channels, reply }).await?;
        rx.await.map_err(|_| ChannelError::ConnectionClosed)?
    }

    /// Ask the task to close the connection and wait until it has
    async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> ChannelResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ChannelError::ConnectionClosed)
    }
}

enum SubscriberState {
    Uninitialized,
    Connected {
        control: Control,
        task: JoinHandle<()>,
    },
    Closed,
}

impl SubscriberState {
    fn control(&self) -> ChannelResult<&Control> {
        match self {
            Self::Connected { control, .. } => Ok(control),
            Self::Uninitialized => Err(ChannelError::NotConnected),
            Self::Closed => Err(ChannelError::Closed),
        }
    }

    fn as_state(&self) -> ConnectionState {
        match self {
            Self::Uninitialized => ConnectionState::Uninitialized,
            Self::Connected { .. } => ConnectionState::Connected,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Subscriber handle
///
/// `sub`, `unsub` and `close` are serialized internally, so the handle can
/// be shared behind an `Arc`. Listeners run on the blocking pool of the
/// configured executor, so a slow listener never holds up delivery to
/// other channels.
///
/// ```ignore
/// let subscriber = SubChannel::builder()
///     .redis_url("redis://127.0.0.1:6379")?
///     .codec(StringCodec)
///     .build()?;
/// subscriber.connect().await?;
/// subscriber
///     .sub("test:channel", |channel, message| {
///         tracing::info!(%channel, %message, "received");
///         Ok(())
///     })
///     .await?;
/// ```
pub struct SubChannel<T> {
    client: Arc<dyn Connector>,
    codec: Arc<dyn Codec<T>>,
    executor: Option<Handle>,
    config: SubscriberConfig,
    registry: Registry<T>,
    state: Mutex<SubscriberState>,
}

impl SubChannel<Vec<u8>> {
    /// Builder with the raw bytes codec preselected
    #[must_use]
    pub fn builder() -> SubChannelBuilder<Vec<u8>> {
        SubChannelBuilder::new()
    }
}

impl<T: Send + 'static> SubChannel<T> {
    /// Open the connection and start the connection task
    pub async fn connect(&self) -> ChannelResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            SubscriberState::Connected { .. } => return Err(ChannelError::AlreadyConnected),
            SubscriberState::Closed => return Err(ChannelError::Closed),
            SubscriberState::Uninitialized => {}
        }

        let conn = self.client.connect_subscriber().await?;
        let executor = self.executor.clone().unwrap_or_else(Handle::current);
        let dispatcher = Dispatcher::new(self.registry.clone(), self.codec.clone(), executor);
        let (tx, rx) = mpsc::channel(self.config.command_buffer);

        let task = tokio::spawn(run_connection(conn, dispatcher, rx));
        *state = SubscriberState::Connected {
            control: Control { tx },
            task,
        };

        tracing::info!(
            resubscribe = ?self.config.resubscribe,
            "Subscriber connected"
        );
        Ok(())
    }

    /// Register a listener for `channel` and subscribe to it
    ///
    /// Fails with [`ChannelError::AlreadySubscribed`] if the channel already
    /// has a listener.
    pub async fn sub<F>(&self, channel: impl Into<String>, listener: F) -> ChannelResult<()>
    where
        F: Fn(&str, T) -> ListenerResult + Send + Sync + 'static,
    {
        let channel = channel.into();
        let state = self.state.lock().await;
        let control = state.control()?;

        if self.is_subscribed(&channel) {
            return Err(ChannelError::AlreadySubscribed(channel));
        }

        let listener: Listener<T> = Arc::new(listener);

        if self.config.resubscribe.is_bulk() {
            let previous = self.channels();
            control.unsubscribe(previous.clone()).await?;
            self.registry.write().insert(channel.clone(), listener);
            if let Err(e) = control.subscribe(self.channels()).await {
                self.registry.write().remove(&channel);
                self.restore(control, previous).await;
                return Err(e);
            }
        } else {
            self.registry.write().insert(channel.clone(), listener);
            if let Err(e) = control.subscribe(vec![channel.clone()]).await {
                self.registry.write().remove(&channel);
                return Err(e);
            }
        }

        tracing::info!(channel = %channel, "Subscribed channel");
        Ok(())
    }

    /// Remove the listener for `channel` and unsubscribe from it
    ///
    /// Unknown channels are a no-op.
    pub async fn unsub(&self, channel: &str) -> ChannelResult<()> {
        let state = self.state.lock().await;
        if !self.is_subscribed(channel) {
            return Ok(());
        }
        let control = state.control()?;

        if self.config.resubscribe.is_bulk() {
            control.unsubscribe(self.channels()).await?;
            self.registry.write().remove(channel);
            let remaining = self.channels();
            if let Err(e) = control.subscribe(remaining.clone()).await {
                self.restore(control, remaining).await;
                return Err(e);
            }
        } else {
            control.unsubscribe(vec![channel.to_string()]).await?;
            self.registry.write().remove(channel);
        }

        tracing::info!(channel = %channel, "Unsubscribed channel");
        Ok(())
    }

    /// Re-issue SUBSCRIBE for `channels` after a failed bulk change. Entries
    /// the server would not take back are dropped so the registry matches
    /// the server-side set again.
    async fn restore(&self, control: &Control, channels: Vec<String>) {
        if channels.is_empty() {
            return;
        }

        if let Err(e) = control.subscribe(channels.clone()).await {
            {
                let mut registry = self.registry.write();
                for channel in &channels {
                    registry.remove(channel);
                }
            }
            tracing::error!(
                channels = ?channels,
                error = %e,
                "Failed to restore subscriptions; listeners dropped"
            );
        } else {
            tracing::warn!(channels = channels.len(), "Restored subscriptions after failed change");
        }
    }

    /// Unsubscribe everything, drop all listeners and close the connection
    ///
    /// Never fails; safe to call repeatedly or before `connect`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, SubscriberState::Closed);

        if let SubscriberState::Connected { control, task } = previous {
            if let Err(e) = control.unsubscribe(self.channels()).await {
                tracing::warn!(error = %e, "Failed to unsubscribe while closing");
            }
            self.registry.write().clear();
            control.shutdown().await;

            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Connection task ended abnormally");
            }
            tracing::info!("Subscriber closed");
        } else {
            self.registry.write().clear();
        }
    }
}

impl<T> SubChannel<T> {
    /// Registered channel names, sorted
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.registry.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Whether `channel` has a listener
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.registry.read().contains_key(channel)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.as_state()
    }
}

/// Connection task: the dispatch hook plus command execution
async fn run_connection<T: Send + 'static>(
    mut conn: Box<dyn SubscribeConnection>,
    dispatcher: Dispatcher<T>,
    mut control_rx: mpsc::Receiver<Command>,
) {
    loop {
        tokio::select! {
            // Handle incoming messages
            msg = conn.next_message() => {
                match msg {
                    Some(msg) => {
                        dispatcher.dispatch(msg);
                    }
                    None => {
                        tracing::warn!("Pub/Sub stream ended");
                        break;
                    }
                }
            }

            // Handle control commands
            cmd = control_rx.recv() => {
                match cmd {
                    Some(Command::Subscribe { channels, reply }) => {
                        let result = conn.subscribe(&channels).await;
                        log_command("SUBSCRIBE", &channels, &result);
                        let _ = reply.send(result);
                    }
                    Some(Command::Unsubscribe { channels, reply }) => {
                        let result = conn.unsubscribe(&channels).await;
                        log_command("UNSUBSCRIBE", &channels, &result);
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown { reply }) => {
                        conn.close().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        tracing::debug!("Control channel closed");
                        break;
                    }
                }
            }
        }
    }

    conn.close().await;
}

fn log_command(command: &str, channels: &[String], result: &ChannelResult<()>) {
    match result {
        Ok(()) => tracing::debug!(
            command = command,
            channels = channels.len(),
            "Subscription command applied"
        ),
        Err(e) => tracing::error!(
            command = command,
            channels = ?channels,
            error = %e,
            "Subscription command failed"
        ),
    }
}

/// Builder for [`SubChannel`]
pub struct SubChannelBuilder<T> {
    client: Option<Arc<dyn Connector>>,
    codec: Arc<dyn Codec<T>>,
    executor: Option<Handle>,
    config: SubscriberConfig,
}

impl SubChannelBuilder<Vec<u8>> {
    /// Create a new builder using [`BytesCodec`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            codec: Arc::new(BytesCodec),
            executor: None,
            config: SubscriberConfig::default(),
        }
    }
}

impl Default for SubChannelBuilder<Vec<u8>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SubChannelBuilder<T> {
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

    /// Set the value codec, changing the received value type
    #[must_use]
    pub fn codec<U, C: Codec<U>>(self, codec: C) -> SubChannelBuilder<U> {
        SubChannelBuilder {
            client: self.client,
            codec: Arc::new(codec),
            executor: self.executor,
            config: self.config,
        }
    }

    /// Run listeners on this runtime instead of the one current at `connect()`
    #[must_use]
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the resubscription policy
    #[must_use]
    pub fn resubscribe(mut self, policy: ResubscribePolicy) -> Self {
        self.config.resubscribe = policy;
        self
    }

    /// Set the command queue capacity
    #[must_use]
    pub fn command_buffer(mut self, size: usize) -> Self {
        self.config.command_buffer = size.max(1);
        self
    }

    /// Apply a full configuration
    #[must_use]
    pub fn config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the subscriber; it still has to be connected
    pub fn build(self) -> ChannelResult<SubChannel<T>> {
        let client = self.client.ok_or(ChannelError::MissingConfig("client"))?;

        let mut config = self.config;
        config.command_buffer = config.command_buffer.max(1);

        Ok(SubChannel {
            client,
            codec: self.codec,
            executor: self.executor,
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(SubscriberState::Uninitialized),
        })
    }
}

//! In-process broker with Redis pub/sub delivery semantics.
//!
//! Messages go only to connections subscribed at publish time, nothing is
//! stored, and `publish` reports how many connections received the message.

use super::{Connector, PublishConnection, RawMessage, SubscribeConnection};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Most recent commands kept by [`MemoryBroker::commands`]
pub const COMMAND_LOG_CAPACITY: usize = 1024;

/// Subscription command as received by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

struct Session {
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<RawMessage>,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<u64, Session>,
    commands: VecDeque<BrokerCommand>,
}

/// Shared in-memory broker; clones refer to the same broker
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("sessions", &self.state.lock().sessions.len())
            .finish()
    }
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload to every connection subscribed to `channel`
    pub fn publish(&self, channel: &str, payload: impl Into<Vec<u8>>) -> u32 {
        let payload = payload.into();
        let state = self.state.lock();
        let mut receivers = 0;

        for session in state.sessions.values() {
            if session.channels.contains(channel)
                && session
                    .tx
                    .send(RawMessage::new(channel, payload.clone()))
                    .is_ok()
            {
                receivers += 1;
            }
        }

        receivers
    }

    /// Number of connections currently subscribed to `channel`
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.channels.contains(channel))
            .count()
    }

    /// Number of open subscribe connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Subscribe/unsubscribe commands received so far, oldest first. Only
    /// the last [`COMMAND_LOG_CAPACITY`] are kept.
    #[must_use]
    pub fn commands(&self) -> Vec<BrokerCommand> {
        self.state.lock().commands.iter().cloned().collect()
    }

    /// Forget the command history
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Drop every subscribe session as if the server went away; their
    /// `next_message` returns `None` once drained
    pub fn disconnect_all(&self) {
        self.state.lock().sessions.clear();
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect_publisher(&self) -> ChannelResult<Box<dyn PublishConnection>> {
        Ok(Box::new(MemoryPublisher {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect_subscriber(&self) -> ChannelResult<Box<dyn SubscribeConnection>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.state.lock().sessions.insert(
            id,
            Session {
                channels: HashSet::new(),
                tx,
            },
        );

        Ok(Box::new(MemorySubscriber {
            broker: self.clone(),
            id,
            rx,
        }))
    }
}

struct MemoryPublisher {
    broker: MemoryBroker,
    closed: AtomicBool,
}

#[async_trait]
impl PublishConnection for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> ChannelResult<u32> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::ConnectionClosed);
        }
        Ok(self.broker.publish(channel, payload))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemorySubscriber {
    broker: MemoryBroker,
    id: u64,
    rx: mpsc::UnboundedReceiver<RawMessage>,
}

impl MemorySubscriber {
    fn apply(&self, command: BrokerCommand) -> ChannelResult<()> {
        let mut state = self.broker.state.lock();
        let session = state
            .sessions
            .get_mut(&self.id)
            .ok_or(ChannelError::ConnectionClosed)?;

        match &command {
            BrokerCommand::Subscribe(channels) => {
                session.channels.extend(channels.iter().cloned());
            }
            BrokerCommand::Unsubscribe(channels) => {
                for channel in channels {
                    session.channels.remove(channel);
                }
            }
        }

        if state.commands.len() == COMMAND_LOG_CAPACITY {
            state.commands.pop_front();
        }
        state.commands.push_back(command);
        Ok(())
    }
}

#[async_trait]
impl SubscribeConnection for MemorySubscriber {
    async fn subscribe(&mut self, channels: &[String]) -> ChannelResult<()> {
        self.apply(BrokerCommand::Subscribe(channels.to_vec()))
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> ChannelResult<()> {
        self.apply(BrokerCommand::Unsubscribe(channels.to_vec()))
    }

    async fn next_message(&mut self) -> Option<RawMessage> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.broker.state.lock().sessions.remove(&self.id);
        self.rx.close();
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.broker.state.lock().sessions.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(channels: &[&str]) -> Vec<String> {
        channels.iter().map(|c| (*c).to_string()).collect()
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.publish("nobody", "hello"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect_subscriber().await.unwrap();
        sub.subscribe(&names(&["a", "b"])).await.unwrap();

        assert_eq!(broker.publish("a", "one"), 1);
        assert_eq!(broker.publish("c", "ignored"), 0);

        let msg = sub.next_message().await.unwrap();
        assert_eq!(msg, RawMessage::new("a", "one"));
        assert_eq!(broker.subscriber_count("b"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect_subscriber().await.unwrap();
        sub.subscribe(&names(&["a"])).await.unwrap();
        sub.unsubscribe(&names(&["a"])).await.unwrap();

        assert_eq!(broker.publish("a", "late"), 0);
        assert_eq!(
            broker.commands(),
            vec![
                BrokerCommand::Subscribe(names(&["a"])),
                BrokerCommand::Unsubscribe(names(&["a"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_command_log_is_bounded() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect_subscriber().await.unwrap();

        for i in 0..=COMMAND_LOG_CAPACITY {
            sub.subscribe(&[format!("ch-{i}")]).await.unwrap();
        }

        let commands = broker.commands();
        assert_eq!(commands.len(), COMMAND_LOG_CAPACITY);
        assert_eq!(commands[0], BrokerCommand::Subscribe(names(&["ch-1"])));
        assert_eq!(
            commands[COMMAND_LOG_CAPACITY - 1],
            BrokerCommand::Subscribe(vec![format!("ch-{COMMAND_LOG_CAPACITY}")])
        );

        broker.clear_commands();
        assert!(broker.commands().is_empty());
    }

    #[tokio::test]
    async fn test_close_removes_session() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect_subscriber().await.unwrap();
        sub.subscribe(&names(&["a"])).await.unwrap();
        assert_eq!(broker.connection_count(), 1);

        sub.close().await;
        assert_eq!(broker.connection_count(), 0);
        assert!(sub.next_message().await.is_none());
        assert!(matches!(
            sub.subscribe(&names(&["a"])).await,
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_closed_publisher_rejects() {
        let broker = MemoryBroker::new();
        let publisher = broker.connect_publisher().await.unwrap();
        assert_eq!(publisher.publish("a", b"x".to_vec()).await.unwrap(), 0);

        publisher.close().await;
        assert!(publisher.publish("a", b"x".to_vec()).await.is_err());
    }
}

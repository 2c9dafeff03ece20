//! Listener registry and message dispatch.

use crate::codec::Codec;
use crate::connection::RawMessage;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Return type of channel listeners; an `Err` is logged, never propagated
pub type ListenerResult = anyhow::Result<()>;

/// Registered per-channel callback
pub(crate) type Listener<T> = Arc<dyn Fn(&str, T) -> ListenerResult + Send + Sync>;

/// Channel name -> listener, shared between a handle and its connection task.
/// Never hold the lock across an `.await`.
pub(crate) type Registry<T> = Arc<RwLock<HashMap<String, Listener<T>>>>;

/// What the dispatch hook did with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// Listener handed to the executor
    Spawned,
    /// No listener registered for the channel; message dropped
    UnknownChannel,
    /// Payload could not be decoded; message dropped
    DecodeFailed,
}

/// Routes inbound messages to registered listeners
pub(crate) struct Dispatcher<T> {
    registry: Registry<T>,
    codec: Arc<dyn Codec<T>>,
    executor: Handle,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub(crate) fn new(registry: Registry<T>, codec: Arc<dyn Codec<T>>, executor: Handle) -> Self {
        Self {
            registry,
            codec,
            executor,
        }
    }

    /// Look up, decode and hand off to the blocking pool. Does not wait for
    /// the listener.
    pub(crate) fn dispatch(&self, msg: RawMessage) -> DispatchOutcome {
        let RawMessage { channel, payload } = msg;

        let listener = self.registry.read().get(&channel).cloned();
        let Some(listener) = listener else {
            tracing::warn!(channel = %channel, "Received message for unknown channel");
            return DispatchOutcome::UnknownChannel;
        };

        let value = match self.codec.decode(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Dropping undecodable message");
                return DispatchOutcome::DecodeFailed;
            }
        };

        tracing::trace!(channel = %channel, bytes = payload.len(), "Received Pub/Sub message");

        // Listeners are plain `Fn`s and may block; keep them off the workers
        // that drive the connection task.
        self.executor.spawn_blocking(move || invoke(&listener, &channel, value));

        DispatchOutcome::Spawned
    }
}

/// Run a listener, containing both `Err` returns and panics
pub(crate) fn invoke<T>(listener: &Listener<T>, channel: &str, value: T) {
    match panic::catch_unwind(AssertUnwindSafe(|| listener(channel, value))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(channel = %channel, error = %e, "Error while receiving channel");
        }
        Err(payload) => {
            tracing::error!(
                channel = %channel,
                panic = %panic_message(payload.as_ref()),
                "Listener panicked while receiving channel"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

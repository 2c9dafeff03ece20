//! Publisher and subscriber channel handles.

mod listener;
mod publisher;
mod state;
mod subscriber;

pub use listener::ListenerResult;
pub use publisher::{PubChannel, PubChannelBuilder};
pub use state::ConnectionState;
pub use subscriber::{SubChannel, SubChannelBuilder, SubscriberConfig};

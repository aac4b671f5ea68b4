/// Reconnect delay policy.
pub mod backoff;
/// Public client handle.
pub mod client;
pub(crate) mod connection_manager;
/// Per-channel listener fan-out.
pub mod dispatcher;
/// Desired subscription set.
pub mod registry;
/// Connection state, events and notifications.
pub mod state;

pub use backoff::ReconnectPolicy;
pub use client::ChannelClient;
pub use registry::ChannelRegistry;
pub use state::{ConnectionEvent, ConnectionState, Notification};

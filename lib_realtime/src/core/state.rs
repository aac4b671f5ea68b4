//! Connection state and the lifecycle events observers receive.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::Message;

/// Where the single transport connection currently stands.
///
/// Owned by the connection manager; everyone else observes it through a
/// `watch` receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The link is open; heartbeat is running.
    Connected,
    /// No link and no reconnection pending. Initial state.
    #[default]
    Disconnected,
    /// The link dropped and a reconnect timer is pending.
    Reconnecting,
    /// Retries are exhausted (or the endpoint is unusable). Only an explicit
    /// `reconnect()` recovers.
    Error,
}

impl ConnectionState {
    /// Lower-case name, as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures meant for the user rather than the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Automatic reconnection gave up after `attempts` attempts.
    RetriesExhausted { attempts: u32 },
    /// The endpoint can never be reached as configured.
    EndpointUnusable { reason: String },
    /// The server sent a `type: "error"` frame.
    ServerError { message: String },
    /// No inbound traffic for longer than the configured pong timeout.
    HeartbeatTimeout { silent_for: Duration },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::RetriesExhausted { attempts } => write!(
                f,
                "Connection lost. Gave up after {attempts} reconnection attempts."
            ),
            Notification::EndpointUnusable { reason } => {
                write!(f, "Cannot connect to the event server: {reason}")
            }
            Notification::ServerError { message } => write!(f, "Server error: {message}"),
            Notification::HeartbeatTimeout { silent_for } => write!(
                f,
                "No response from the event server for {}s.",
                silent_for.as_secs()
            ),
        }
    }
}

/// Lifecycle events broadcast by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The link opened.
    Opened,
    /// A valid frame arrived (any kind, any channel).
    Message(Arc<Message>),
    /// The link closed. `clean` is true only for a normal closure.
    Closed { clean: bool, reason: String },
    /// The transport reported an error.
    TransportError(String),
    /// Reconnect attempt number `attempt` will start after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// A user-visible failure.
    Notice(Notification),
}

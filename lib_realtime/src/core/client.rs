//! # Channel Client
//!
//! [`ChannelClient`] is the cloneable handle every consumer shares. It holds
//! no connection state of its own: calls are forwarded to the connection
//! manager task and observed state comes back through `watch`/`broadcast`
//! receivers.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::adapters::ChannelFeed;
use crate::configs::ClientConfig;
use crate::core::connection_manager::{Command, ConnectionManager, Outputs};
use crate::core::state::{ConnectionEvent, ConnectionState};
use crate::error::ClientError;
use crate::protocol::{Message, OutboundMessage};
use crate::transport::Connector;

/// Capacity of the lifecycle event channel; slow observers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Handle to the shared real-time connection.
///
/// All methods are fire-and-forget; outcomes surface through
/// [`state`](Self::state), [`events`](Self::events) and channel feeds.
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct ChannelClient {
    config: Arc<ClientConfig>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    last_message: watch::Receiver<Option<Arc<Message>>>,
    channels: watch::Receiver<Vec<String>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ChannelClient {
    /// Creates a client speaking WebSocket to `config.url`.
    #[cfg(feature = "ws")]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(crate::transport::ws::WsConnector::new()))
    }

    /// Creates a client over an arbitrary transport and starts its manager
    /// task. Connects immediately when `config.auto_connect` is set.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (last_tx, last_message) = watch::channel(None);
        let (channels_tx, channels) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let outputs = Outputs {
            state: state_tx,
            last_message: last_tx,
            channels: channels_tx,
            events: events.clone(),
        };
        let manager = ConnectionManager::new(&config, connector, command_rx, outputs);
        tokio::spawn(manager.run());

        let client = Self {
            config: Arc::new(config),
            commands,
            state,
            last_message,
            channels,
            events,
        };
        if client.config.auto_connect {
            client.connect();
        }
        client
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // --- Lifecycle ---

    /// Opens the connection if it is not already open or opening.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Closes the connection cleanly and cancels any pending reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drops any current link, resets the attempt counter and connects again.
    /// The only way out of [`ConnectionState::Error`] besides `connect`.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    // --- Channels ---

    /// Adds `channel` to the subscription set. It stays there until
    /// [`unsubscribe`](Self::unsubscribe), even after every feed on it is
    /// disposed.
    pub fn subscribe(&self, channel: impl Into<String>) {
        self.command(Command::Subscribe(channel.into()));
    }

    /// Removes `channel` from the subscription set.
    pub fn unsubscribe(&self, channel: impl Into<String>) {
        self.command(Command::Unsubscribe(channel.into()));
    }

    /// Publishes `message` if connected; otherwise it is dropped with a
    /// warning in the log.
    pub fn send(&self, message: OutboundMessage) {
        self.command(Command::Send(message));
    }

    /// Opens a feed on `channel` sized from the configuration. The channel is
    /// subscribed while at least one feed holds it, unless it was also
    /// subscribed explicitly.
    pub fn open_channel(&self, channel: &str) -> ChannelFeed {
        self.open_channel_with_capacity(channel, self.config.capacity_for(channel))
    }

    pub fn open_channel_with_capacity(&self, channel: &str, capacity: usize) -> ChannelFeed {
        ChannelFeed::open(channel, capacity, self.commands.clone(), self.state.clone())
    }

    // --- Observation ---

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Most recent inbound message on any channel.
    pub fn last_message(&self) -> Option<Arc<Message>> {
        self.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<Arc<Message>>> {
        self.last_message.clone()
    }

    /// Subscription set in insertion order.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.channels.borrow().clone()
    }

    /// Lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Resolves once the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Disconnects, stops the manager task and waits for it to finish.
    /// Other clones become inert.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(ack))
            .map_err(|_| ClientError::Closed)?;
        done.await.map_err(|_| ClientError::Closed)
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::warn!("connection manager has stopped, command ignored");
        }
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish()
    }
}

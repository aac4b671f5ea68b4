//! # Connection Manager
//!
//! The single task that owns the transport link. Everything that can change
//! connection state goes through here: public [`ChannelClient`] calls arrive
//! as [`Command`]s, link events and timers are polled in the same
//! `tokio::select!`, so transitions are applied strictly one at a time.
//!
//! ## Owned state:
//!
//! - **Link**: at most one live [`Link`] and at most one in-flight connect.
//! - **Registry**: the desired channel set, replayed after every open. Channels
//!   subscribed through [`ChannelClient::subscribe`] are kept apart from those
//!   held only by feeds, so the last feed going away never drops them.
//! - **Reconnect policy**: attempt counter plus the single reconnect timer.
//! - **Heartbeat**: an `Interval` that only exists while `Connected`.
//! - **Dispatcher**: per-channel listeners registered by feeds.
//!
//! `online` records the caller's intent. A timer that fires after
//! `disconnect()` finds `online == false` and does nothing.
//!
//! [`ChannelClient`]: crate::ChannelClient

use std::collections::HashSet;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};

use crate::configs::ClientConfig;
use crate::core::backoff::ReconnectPolicy;
use crate::core::dispatcher::{Dispatcher, ListenerId, ListenerSink};
use crate::core::registry::ChannelRegistry;
use crate::core::state::{ConnectionEvent, ConnectionState, Notification};
use crate::error::TransportError;
use crate::protocol::{Message, MessageKind, OutboundMessage};
use crate::transport::{CloseInfo, Connector, Link, LinkEvent};
use crate::utils::now_iso8601;

/// Upper bound on a background close handshake before the link is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Link>, TransportError>>;

/// Requests sent from client handles and feeds to the manager task.
pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Subscribe(String),
    Unsubscribe(String),
    Send(OutboundMessage),
    Attach {
        channel: String,
        id: ListenerId,
        sink: ListenerSink,
    },
    Detach {
        channel: String,
        id: ListenerId,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Outward-facing senders the manager publishes on.
pub(crate) struct Outputs {
    pub state: watch::Sender<ConnectionState>,
    pub last_message: watch::Sender<Option<Arc<Message>>>,
    pub channels: watch::Sender<Vec<String>>,
    pub events: broadcast::Sender<ConnectionEvent>,
}

enum Wake {
    Command(Option<Command>),
    Opened(Result<Box<dyn Link>, TransportError>),
    Link(LinkEvent),
    Heartbeat,
    ReconnectDue,
}

pub(crate) struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    outputs: Outputs,

    registry: ChannelRegistry,
    explicit: HashSet<String>,
    dispatcher: Dispatcher,
    policy: ReconnectPolicy,

    heartbeat_period: Duration,
    pong_timeout: Option<Duration>,

    online: bool,
    pending: Option<ConnectFuture>,
    link: Option<Box<dyn Link>>,
    heartbeat: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    last_inbound: Instant,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        outputs: Outputs,
    ) -> Self {
        Self {
            url: config.url.clone(),
            connector,
            commands,
            outputs,
            registry: ChannelRegistry::new(),
            explicit: HashSet::new(),
            dispatcher: Dispatcher::new(),
            policy: ReconnectPolicy::new(config.reconnect_base(), config.max_reconnect_attempts),
            heartbeat_period: config.heartbeat_period(),
            pong_timeout: config.pong_deadline(),
            online: false,
            pending: None,
            link: None,
            heartbeat: None,
            reconnect_timer: None,
            last_inbound: Instant::now(),
        }
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    pub(crate) async fn run(mut self) {
        tracing::info!(url = %self.url, "connection manager started");

        loop {
            let wake = tokio::select! {
                biased;
                cmd = self.commands.recv() => Wake::Command(cmd),
                event = next_link_event(&mut self.link) => Wake::Link(event),
                result = poll_connect(&mut self.pending) => Wake::Opened(result),
                _ = tick(&mut self.heartbeat) => Wake::Heartbeat,
                _ = fire(&mut self.reconnect_timer) => Wake::ReconnectDue,
            };

            match wake {
                Wake::Command(Some(Command::Shutdown(ack))) => {
                    self.shutdown();
                    let _ = ack.send(());
                    break;
                }
                Wake::Command(None) => {
                    tracing::debug!("all client handles dropped");
                    self.shutdown();
                    break;
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Opened(result) => {
                    self.pending = None;
                    self.on_connect_result(result).await;
                }
                Wake::Link(event) => self.on_link_event(event).await,
                Wake::Heartbeat => self.on_heartbeat().await,
                Wake::ReconnectDue => {
                    self.reconnect_timer = None;
                    self.on_reconnect_due();
                }
            }
        }

        tracing::info!(url = %self.url, "connection manager stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Reconnect => self.reconnect(),
            Command::Subscribe(channel) => {
                self.explicit.insert(channel.clone());
                self.subscribe(channel).await;
            }
            Command::Unsubscribe(channel) => {
                self.explicit.remove(&channel);
                self.unsubscribe(&channel).await;
            }
            Command::Send(message) => self.send(message).await,
            Command::Attach { channel, id, sink } => {
                let first = self.dispatcher.add_listener(&channel, id, sink);
                if first || !self.registry.contains(&channel) {
                    self.subscribe(channel).await;
                }
            }
            Command::Detach { channel, id } => {
                if self.dispatcher.remove_listener(&channel, id) {
                    self.release(&channel).await;
                }
            }
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    // --- Lifecycle ---

    fn connect(&mut self) {
        self.online = true;
        if self.link.is_some() || self.pending.is_some() {
            tracing::debug!(state = %self.current_state(), "connect ignored, link already active");
            return;
        }
        if self.reconnect_timer.take().is_none() {
            // Fresh session rather than a manual retry during backoff.
            self.policy.reset();
        }
        self.start_attempt();
    }

    fn disconnect(&mut self) {
        self.online = false;
        self.teardown("client disconnect");
        self.policy.reset();
        self.set_state(ConnectionState::Disconnected);
    }

    fn reconnect(&mut self) {
        tracing::info!(url = %self.url, "manual reconnect requested");
        self.teardown("client reconnect");
        self.policy.reset();
        self.online = true;
        self.start_attempt();
    }

    fn shutdown(&mut self) {
        self.online = false;
        self.teardown("client closed");
        self.dispatcher.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn start_attempt(&mut self) {
        tracing::debug!(url = %self.url, attempt = self.policy.attempts(), "opening link");
        self.set_state(ConnectionState::Connecting);
        self.pending = Some(self.connector.connect(&self.url));
    }

    /// Cancels timers and any in-flight attempt, then closes the live link
    /// cleanly. Leaves the state untouched.
    fn teardown(&mut self, reason: &str) {
        self.reconnect_timer = None;
        self.heartbeat = None;
        self.pending = None;
        if let Some(link) = self.link.take() {
            close_in_background(link);
            self.emit(ConnectionEvent::Closed {
                clean: true,
                reason: reason.to_string(),
            });
        }
    }

    async fn on_connect_result(&mut self, result: Result<Box<dyn Link>, TransportError>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.policy.reset();
                self.last_inbound = Instant::now();
                self.start_heartbeat();
                self.set_state(ConnectionState::Connected);
                self.emit(ConnectionEvent::Opened);
                tracing::info!(url = %self.url, channels = self.registry.len(), "link opened");

                for channel in self.registry.snapshot() {
                    self.transmit(OutboundMessage::subscribe(&channel)).await;
                }
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "connection attempt failed");
                self.emit(ConnectionEvent::TransportError(e.to_string()));
                if e.is_recoverable() {
                    self.on_unclean_close();
                } else {
                    self.fail(Notification::EndpointUnusable {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame(text) => self.on_frame(&text).await,
            LinkEvent::Closed(info) => {
                self.drop_link();
                self.on_closed(info);
            }
            LinkEvent::Failed(e) => {
                self.drop_link();
                tracing::warn!(error = %e, "link failed");
                self.emit(ConnectionEvent::TransportError(e.to_string()));
                if e.is_recoverable() {
                    self.emit(ConnectionEvent::Closed {
                        clean: false,
                        reason: e.to_string(),
                    });
                    self.on_unclean_close();
                } else {
                    self.fail(Notification::EndpointUnusable {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn on_closed(&mut self, info: CloseInfo) {
        let clean = info.is_clean();
        tracing::info!(code = ?info.code, reason = %info.reason, clean, "link closed");
        self.emit(ConnectionEvent::Closed {
            clean,
            reason: info.reason,
        });
        if clean {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.on_unclean_close();
        }
    }

    fn on_unclean_close(&mut self) {
        if !self.online {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        match self.policy.schedule_next() {
            Some((attempt, delay)) => {
                tracing::info!(
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
                self.set_state(ConnectionState::Reconnecting);
                self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay });
            }
            None => self.fail(Notification::RetriesExhausted {
                attempts: self.policy.max_attempts(),
            }),
        }
    }

    fn on_reconnect_due(&mut self) {
        if !self.online {
            tracing::debug!("reconnect timer fired after disconnect, ignoring");
            return;
        }
        self.start_attempt();
    }

    /// Terminal failure: no automatic recovery from here.
    fn fail(&mut self, notice: Notification) {
        tracing::error!(url = %self.url, %notice, "giving up on connection");
        self.reconnect_timer = None;
        self.set_state(ConnectionState::Error);
        self.emit(ConnectionEvent::Notice(notice));
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.heartbeat = None;
    }

    // --- Channels ---

    async fn subscribe(&mut self, channel: String) {
        if self.registry.insert(&channel) {
            tracing::debug!(channel = %channel, "channel added");
            self.publish_channels();
        }
        if self.is_connected() {
            self.transmit(OutboundMessage::subscribe(&channel)).await;
        }
    }

    async fn unsubscribe(&mut self, channel: &str) {
        if !self.registry.remove(channel) {
            return;
        }
        tracing::debug!(channel, "channel removed");
        self.publish_channels();
        if self.is_connected() {
            self.transmit(OutboundMessage::unsubscribe(channel)).await;
        }
    }

    /// The last feed on `channel` is gone; drop it unless it was subscribed
    /// explicitly.
    async fn release(&mut self, channel: &str) {
        if self.explicit.contains(channel) {
            tracing::debug!(channel, "keeping explicitly subscribed channel");
            return;
        }
        self.unsubscribe(channel).await;
    }

    async fn send(&mut self, message: OutboundMessage) {
        if !self.is_connected() {
            tracing::warn!(
                kind = %message.kind,
                state = %self.current_state(),
                "not connected, dropping outbound message"
            );
            return;
        }
        self.transmit(message).await;
    }

    async fn transmit(&mut self, message: OutboundMessage) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let kind = message.kind.clone();
        let text = match message.stamp(now_iso8601()).to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(%kind, error = %e, "failed to encode outbound message");
                return;
            }
        };
        match link.send_text(text).await {
            Ok(()) => tracing::trace!(%kind, "frame sent"),
            Err(e) => tracing::warn!(%kind, error = %e, "failed to write frame"),
        }
    }

    // --- Inbound ---

    async fn on_frame(&mut self, text: &str) {
        self.last_inbound = Instant::now();

        let message = match Message::from_text(text) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };

        self.outputs
            .last_message
            .send_replace(Some(Arc::clone(&message)));
        self.emit(ConnectionEvent::Message(Arc::clone(&message)));

        match &message.kind {
            MessageKind::Pong => {
                tracing::trace!("pong");
                return;
            }
            MessageKind::Error => {
                let reason = error_text(&message.data);
                tracing::warn!(error = %reason, "server reported an error");
                self.emit(ConnectionEvent::Notice(Notification::ServerError { message: reason }));
            }
            _ => {}
        }

        if let Some(channel) = self.dispatcher.dispatch(&message) {
            tracing::debug!(channel = %channel, "last listener went away");
            self.release(&channel).await;
        }
    }

    // --- Heartbeat ---

    fn start_heartbeat(&mut self) {
        let mut interval = interval_at(Instant::now() + self.heartbeat_period, self.heartbeat_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    async fn on_heartbeat(&mut self) {
        if let Some(limit) = self.pong_timeout {
            let silent_for = self.last_inbound.elapsed();
            if silent_for > limit {
                tracing::warn!(silent_ms = silent_for.as_millis() as u64, "peer went silent");
                self.emit(ConnectionEvent::Notice(Notification::HeartbeatTimeout { silent_for }));
                if let Some(link) = self.link.take() {
                    close_in_background(link);
                }
                self.heartbeat = None;
                self.emit(ConnectionEvent::Closed {
                    clean: false,
                    reason: "heartbeat timeout".to_string(),
                });
                self.on_unclean_close();
                return;
            }
        }
        let stamp = now_iso8601();
        self.transmit(OutboundMessage::ping(&stamp)).await;
    }

    // --- Outputs ---

    fn current_state(&self) -> ConnectionState {
        *self.outputs.state.borrow()
    }

    fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected && self.link.is_some()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.outputs.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "connection state changed");
        }
    }

    fn publish_channels(&self) {
        self.outputs.channels.send_replace(self.registry.snapshot());
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.outputs.events.send(event);
    }
}

/// Best human-readable text out of an error frame's payload.
fn error_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

/// Runs the close handshake on its own task so the manager keeps serving
/// commands and link events meanwhile.
fn close_in_background(mut link: Box<dyn Link>) {
    tokio::spawn(async move {
        if timeout(CLOSE_TIMEOUT, link.close()).await.is_err() {
            tracing::debug!("close handshake timed out");
        }
    });
}

async fn next_link_event(link: &mut Option<Box<dyn Link>>) -> LinkEvent {
    match link {
        Some(link) => link.next_event().await,
        None => pending().await,
    }
}

async fn poll_connect(slot: &mut Option<ConnectFuture>) -> Result<Box<dyn Link>, TransportError> {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(delay) => delay.as_mut().await,
        None => pending::<()>().await,
    }
}

//! # Channel Feed
//!
//! The per-channel façade handed to consumers by
//! [`ChannelClient::open_channel`](crate::ChannelClient::open_channel).
//!
//! Each feed registers its own listener with the connection manager and owns
//! its own [`ChannelBuffer`]; two feeds on the same channel never share a
//! buffer but are fed the same messages in the same order. The manager counts
//! listeners per channel and unsubscribes only when the last feed is disposed.
//!
//! The dispatcher pushes straight into the feed's buffer through a
//! [`FeedSink`], so the capacity bound holds whether or not the consumer ever
//! reads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch, Notify};

use crate::adapters::ChannelBuffer;
use crate::core::connection_manager::Command;
use crate::core::dispatcher::{next_listener_id, ListenerId};
use crate::core::ConnectionState;
use crate::protocol::Message;

struct SinkState {
    buffer: ChannelBuffer,
    /// Newest entries not yet handed out by `recv`. Never exceeds `buffer.len()`.
    unread: usize,
    closed: bool,
}

/// Delivery target shared by a feed and the dispatcher.
pub(crate) struct FeedSink {
    state: Mutex<SinkState>,
    arrived: Notify,
}

impl FeedSink {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SinkState {
                buffer: ChannelBuffer::new(capacity),
                unread: 0,
                closed: false,
            }),
            arrived: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffers `message`, evicting the oldest entry when full. Returns `false`
    /// once the feed is closed.
    pub(crate) fn deliver(&self, message: Arc<Message>) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.buffer.push(message);
            state.unread = (state.unread + 1).min(state.buffer.len());
        }
        self.arrived.notify_one();
        true
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<Arc<Message>> {
        self.lock().buffer.snapshot()
    }

    /// Ends the feed's stream. Whatever is still unread can be received.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_one();
    }
}

pub struct ChannelFeed {
    channel: String,
    id: ListenerId,
    capacity: usize,
    sink: Arc<FeedSink>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    disposed: bool,
}

impl ChannelFeed {
    pub(crate) fn open(
        channel: &str,
        capacity: usize,
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        let id = next_listener_id();
        let sink = Arc::new(FeedSink::new(capacity));
        let capacity = sink.lock().buffer.capacity();
        let attach = Command::Attach {
            channel: channel.to_string(),
            id,
            sink: Arc::downgrade(&sink),
        };
        if commands.send(attach).is_err() {
            tracing::warn!(channel, "client is closed, feed will stay empty");
            sink.close();
        }
        Self {
            channel: channel.to_string(),
            id,
            capacity,
            sink,
            commands,
            state,
            disposed: false,
        }
    }

    /// Channel this feed listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Maximum number of messages the feed retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages currently retained.
    pub fn len(&self) -> usize {
        self.sink.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The buffered messages for this channel, oldest first, bounded to the
    /// feed's capacity. Marks everything as received.
    pub fn read(&mut self) -> Vec<Arc<Message>> {
        let mut state = self.sink.lock();
        state.unread = 0;
        state.buffer.snapshot()
    }

    /// Most recent message on this channel, if any.
    pub fn latest(&mut self) -> Option<Arc<Message>> {
        let mut state = self.sink.lock();
        state.unread = 0;
        state.buffer.latest().cloned()
    }

    /// Waits for the next message on this channel and returns it; it stays in
    /// the buffer. Messages evicted before they were received are skipped.
    /// Returns `None` once the feed is disposed or the client has shut down.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        loop {
            {
                let mut state = self.sink.lock();
                if state.unread > 0 {
                    let index = state.buffer.len() - state.unread;
                    state.unread -= 1;
                    return state.buffer.get(index).cloned();
                }
                if state.closed {
                    return None;
                }
            }
            self.sink.arrived.notified().await;
        }
    }

    /// Whether the shared connection is currently `Connected`.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Empties this feed's buffer, including messages not yet received.
    pub fn clear(&mut self) {
        let mut state = self.sink.lock();
        state.buffer.clear();
        state.unread = 0;
    }

    /// Detaches from the channel. Safe to call more than once; also runs on
    /// drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.clear();
        self.sink.close();
        let detach = Command::Detach {
            channel: self.channel.clone(),
            id: self.id,
        };
        // A closed client has nothing left to detach from.
        let _ = self.commands.send(detach);
        tracing::debug!(channel = %self.channel, listener = self.id, "feed disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ChannelFeed {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ChannelFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFeed")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("buffered", &self.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

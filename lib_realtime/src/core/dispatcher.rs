//! # Channel Dispatcher
//!
//! Routes inbound messages to the per-channel listeners registered by
//! [`ChannelFeed`](crate::ChannelFeed)s.
//!
//! ## Routing rules:
//!
//! - A message is delivered only to listeners of its exact `channel` string;
//!   there is no wildcard or prefix matching. Messages without a channel are
//!   not routed here at all.
//! - Every listener of a channel receives the same `Arc<Message>`, in arrival
//!   order. Nothing is reordered or deduplicated.
//! - Delivery pushes into the feed's own bounded buffer, so a slow reader
//!   never makes the dispatcher hold more than the feed's capacity.
//! - A listener whose feed was dropped or closed is pruned on the next delivery.
//!   If that leaves the channel without listeners, `dispatch` reports it so
//!   the manager can unsubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::adapters::FeedSink;
use crate::protocol::Message;

/// Identifies one registered listener.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique listener id.
pub fn next_listener_id() -> ListenerId {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a feed's buffer. Weak, so a dropped feed simply stops receiving.
pub(crate) type ListenerSink = Weak<FeedSink>;

struct Listener {
    id: ListenerId,
    sink: ListenerSink,
}

impl Listener {
    fn deliver(&self, message: &Arc<Message>) -> bool {
        self.sink
            .upgrade()
            .is_some_and(|sink| sink.deliver(Arc::clone(message)))
    }
}

/// Channel name to listeners.
#[derive(Default)]
pub struct Dispatcher {
    listeners: HashMap<String, Vec<Listener>>,
}

impl Dispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Returns `true` when it is the first listener of
    /// `channel`.
    pub(crate) fn add_listener(&mut self, channel: &str, id: ListenerId, sink: ListenerSink) -> bool {
        let entry = self.listeners.entry(channel.to_string()).or_default();
        entry.push(Listener { id, sink });
        tracing::debug!(channel, listener = id, count = entry.len(), "listener attached");
        entry.len() == 1
    }

    /// Removes a listener. Returns `true` when it was found and was the last
    /// listener of `channel`.
    pub fn remove_listener(&mut self, channel: &str, id: ListenerId) -> bool {
        let Some(entry) = self.listeners.get_mut(channel) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| l.id != id);
        if entry.len() == before {
            return false;
        }
        tracing::debug!(channel, listener = id, count = entry.len(), "listener detached");
        if entry.is_empty() {
            self.listeners.remove(channel);
            return true;
        }
        false
    }

    /// Delivers `message` to every listener of its channel. Returns the
    /// channel name if pruning dead listeners left it empty.
    pub fn dispatch(&mut self, message: &Arc<Message>) -> Option<String> {
        let channel = message.channel.as_deref()?;
        let entry = self.listeners.get_mut(channel)?;

        entry.retain(|listener| {
            let delivered = listener.deliver(message);
            if !delivered {
                tracing::debug!(channel, listener = listener.id, "pruning dropped listener");
            }
            delivered
        });

        if entry.is_empty() {
            self.listeners.remove(channel);
            return Some(channel.to_string());
        }
        None
    }

    /// Number of live listeners on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.get(channel).map_or(0, Vec::len)
    }

    /// Drops every listener; their feeds will see their stream end.
    pub fn clear(&mut self) {
        for listener in self.listeners.drain().flat_map(|(_, listeners)| listeners) {
            if let Some(sink) = listener.sink.upgrade() {
                sink.close();
            }
        }
    }
}

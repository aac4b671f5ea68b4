//! # Channel Registry
//!
//! The set of channels the client *wants* to be subscribed to. It survives
//! reconnects and is only changed by explicit subscribe/unsubscribe calls, so
//! after every (re)connection the manager replays it verbatim. The registry,
//! not the wire, is the source of truth for membership.

/// Insertion-ordered set of channel names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRegistry {
    channels: Vec<String>,
}

impl ChannelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `channel`. Returns `false` if it was already present, in which
    /// case its position is unchanged.
    pub fn insert(&mut self, channel: &str) -> bool {
        if self.contains(channel) {
            return false;
        }
        self.channels.push(channel.to_string());
        true
    }

    /// Removes `channel`. Returns `false` if it was not present.
    pub fn remove(&mut self, channel: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c != channel);
        self.channels.len() != before
    }

    /// Exact-match membership test.
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Channels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Owned copy of the channels in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        self.channels.clone()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

//! Bounded FIFO of the most recent messages on one channel.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::protocol::Message;

/// Keeps the last `capacity` messages in arrival order, evicting the oldest.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    entries: VecDeque<Arc<Message>>,
    capacity: usize,
}

impl ChannelBuffer {
    /// A buffer holding at most `capacity` messages (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `message`, returning the entry evicted to make room, if any.
    pub fn push(&mut self, message: Arc<Message>) -> Option<Arc<Message>> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(message);
        evicted
    }

    /// Copy of the contents, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.entries.iter().cloned().collect()
    }

    /// Entry at `index`, counting from the oldest.
    pub fn get(&self, index: usize) -> Option<&Arc<Message>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.entries.iter()
    }

    /// Most recently pushed message.
    pub fn latest(&self) -> Option<&Arc<Message>> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

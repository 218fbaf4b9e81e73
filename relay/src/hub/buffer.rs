use std::collections::VecDeque;
use std::sync::Arc;

use twitch_client::ChatMessage;

/// Fixed-capacity ring of the most recent messages of one channel.
#[derive(Debug)]
pub struct ChannelBuffer {
    capacity: usize,
    messages: VecDeque<Arc<ChatMessage>>,
}

impl ChannelBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a message, returning the evicted oldest one when full.
    pub fn push(&mut self, msg: Arc<ChatMessage>) -> Option<Arc<ChatMessage>> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(msg);
        evicted
    }

    /// All buffered messages, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<ChatMessage>> {
        self.messages.iter().cloned().collect()
    }

    /// The newest `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<ChatMessage>> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn last_id(&self) -> Option<u64> {
        self.messages.back().map(|m| m.id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

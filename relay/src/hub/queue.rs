use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use twitch_client::ChatMessage;

use super::lock;

/// Bounded per-subscriber outbound queue.
///
/// Pushing never blocks: when full, the oldest queued message is dropped.
/// Single consumer.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Arc<ChatMessage>>,
    closed: bool,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                ..QueueInner::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a message. Returns `true` if an older message had to be dropped.
    pub fn push(&self, msg: Arc<ChatMessage>) -> bool {
        let dropped = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return false;
            }
            let dropped = if inner.items.len() >= self.capacity {
                inner.items.pop_front();
                inner.dropped += 1;
                true
            } else {
                false
            };
            inner.items.push_back(msg);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next message. `None` once closed.
    pub async fn recv(&self) -> Option<Arc<ChatMessage>> {
        loop {
            {
                let mut inner = lock(&self.inner);
                if let Some(msg) = inner.items.pop_front() {
                    return Some(msg);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<ChatMessage>> {
        lock(&self.inner).items.pop_front()
    }

    /// Stop delivery and release queued messages.
    pub fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.closed = true;
            inner.items.clear();
        }
        self.notify.notify_one();
    }

    /// Messages dropped for this subscriber because the queue was full.
    pub fn dropped(&self) -> u64 {
        lock(&self.inner).dropped
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

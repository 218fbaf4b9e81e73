//! Relay hub: per-channel recent-message buffers and subscriber fan-out.
//!
//! The channel map is only write-locked to create or drop a channel. All
//! per-channel work (buffer append, fan-out, registration) runs under that
//! channel's own mutex while the map is read-locked, so channels never
//! contend with each other. Nothing here awaits.

mod buffer;
mod queue;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use twitch_client::ChatMessage;
use uuid::Uuid;

pub use buffer::ChannelBuffer;
pub use queue::OutboundQueue;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifier of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub buffer_capacity: usize,
    pub queue_capacity: usize,
    /// How long a channel with neither upstream nor subscribers is kept.
    pub grace_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 200,
            queue_capacity: 50,
            grace_period: Duration::from_secs(300),
        }
    }
}

/// Per-channel counters exposed on the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub buffered: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub upstream: bool,
    pub last_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub channels: Vec<ChannelStats>,
    pub backpressure_drops: u64,
}

struct ChannelState {
    buffer: ChannelBuffer,
    /// Non-owning: the gateway owns the queue.
    subscribers: HashMap<SubscriberId, Weak<OutboundQueue>>,
    upstream: bool,
    idle_since: Option<Instant>,
}

impl ChannelState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: ChannelBuffer::new(capacity),
            subscribers: HashMap::new(),
            upstream: false,
            idle_since: None,
        }
    }

    fn is_orphaned(&self) -> bool {
        !self.upstream && self.subscribers.is_empty()
    }

    fn refresh_idle(&mut self, now: Instant) {
        if self.is_orphaned() {
            self.idle_since.get_or_insert(now);
        } else {
            self.idle_since = None;
        }
    }
}

/// Fan-out core shared by upstream loops and the subscriber gateway.
pub struct RelayHub {
    config: HubConfig,
    channels: RwLock<HashMap<String, Mutex<ChannelState>>>,
    backpressure: AtomicU64,
}

impl RelayHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            backpressure: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Fresh outbound queue sized for this hub's subscribers.
    pub fn new_queue(&self) -> Arc<OutboundQueue> {
        Arc::new(OutboundQueue::new(self.config.queue_capacity))
    }

    /// Append to the channel buffer and enqueue for every live subscriber.
    pub fn publish(&self, channel: &str, msg: ChatMessage) {
        let msg = Arc::new(msg);
        self.with_channel(channel, true, |state| {
            state.buffer.push(msg.clone());
            state.subscribers.retain(|id, queue| {
                let Some(queue) = queue.upgrade() else {
                    return false;
                };
                if queue.push(msg.clone()) {
                    self.backpressure.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(channel, subscriber = %id, "Subscriber queue full, dropped oldest");
                }
                true
            });
        });
    }

    /// Register a subscriber and return the buffered history, oldest first.
    ///
    /// Runs under the channel lock, so every later publish lands in the
    /// queue and nothing in the returned replay is delivered twice.
    pub fn subscribe(
        &self,
        channel: &str,
        id: SubscriberId,
        queue: &Arc<OutboundQueue>,
    ) -> Vec<Arc<ChatMessage>> {
        self.with_channel(channel, true, |state| {
            state.subscribers.insert(id, Arc::downgrade(queue));
            state.idle_since = None;
            state.buffer.snapshot()
        })
        .unwrap_or_default()
    }

    /// Deregister a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, channel: &str, id: SubscriberId) -> bool {
        self.with_channel(channel, false, |state| {
            let removed = state.subscribers.remove(&id).is_some();
            state.refresh_idle(Instant::now());
            removed
        })
        .unwrap_or(false)
    }

    /// Mark that an upstream connection feeds this channel.
    pub fn attach_upstream(&self, channel: &str) {
        self.with_channel(channel, true, |state| {
            state.upstream = true;
            state.idle_since = None;
        });
    }

    pub fn detach_upstream(&self, channel: &str) {
        self.with_channel(channel, false, |state| {
            state.upstream = false;
            state.refresh_idle(Instant::now());
        });
    }

    /// Drop channels that had neither upstream nor subscribers for longer
    /// than the grace period. Returns the removed channel names.
    pub fn sweep_idle(&self, now: Instant) -> Vec<String> {
        let grace = self.config.grace_period;
        let mut removed = Vec::new();
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels.retain(|name, state| {
            let state = state.get_mut().unwrap_or_else(PoisonError::into_inner);
            state.subscribers.retain(|_, queue| queue.strong_count() > 0);
            state.refresh_idle(now);
            let expired = state
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= grace);
            if expired {
                removed.push(name.clone());
            }
            !expired
        });
        removed
    }

    /// The newest `limit` buffered messages of a channel, oldest first.
    pub fn recent(&self, channel: &str, limit: usize) -> Vec<ChatMessage> {
        self.with_channel(channel, false, |state| {
            state
                .buffer
                .recent(limit)
                .iter()
                .map(|m| m.as_ref().clone())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(channel)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.with_channel(channel, false, |state| {
            state
                .subscribers
                .values()
                .filter(|q| q.strong_count() > 0)
                .count()
        })
        .unwrap_or(0)
    }

    /// Total messages dropped across all subscriber queues.
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HubStats {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<ChannelStats> = channels
            .iter()
            .map(|(name, state)| {
                let state = lock(state);
                ChannelStats {
                    channel: name.clone(),
                    buffered: state.buffer.len(),
                    capacity: state.buffer.capacity(),
                    subscribers: state.subscribers.len(),
                    upstream: state.upstream,
                    last_id: state.buffer.last_id(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.channel.cmp(&b.channel));
        HubStats {
            channels: stats,
            backpressure_drops: self.backpressure_count(),
        }
    }

    fn with_channel<R>(
        &self,
        channel: &str,
        create: bool,
        f: impl FnOnce(&mut ChannelState) -> R,
    ) -> Option<R> {
        {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = channels.get(channel) {
                return Some(f(&mut *lock(state)));
            }
        }
        if !create {
            return None;
        }

        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let state = channels.entry(channel.to_string()).or_insert_with(|| {
            tracing::info!(channel, capacity = self.config.buffer_capacity, "Channel buffer created");
            Mutex::new(ChannelState::new(self.config.buffer_capacity))
        });
        Some(f(state.get_mut().unwrap_or_else(PoisonError::into_inner)))
    }
}

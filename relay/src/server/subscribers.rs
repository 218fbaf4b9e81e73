//! Gateway-side bookkeeping for connected subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hub::{OutboundQueue, SubscriberId, lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One connected UI client. Owns the outbound queue the hub points at.
#[derive(Debug)]
struct Subscriber {
    channel: String,
    state: SubscriberState,
    last_acked: Option<u64>,
    connected_at: DateTime<Utc>,
    queue: Arc<OutboundQueue>,
}

/// Serializable view of a subscriber for the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub channel: String,
    pub state: SubscriberState,
    pub last_acked: Option<u64>,
    pub connected_at: DateTime<Utc>,
    pub queued: usize,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    inner: Mutex<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SubscriberId, channel: &str, queue: Arc<OutboundQueue>) {
        lock(&self.inner).insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                state: SubscriberState::Connecting,
                last_acked: None,
                connected_at: Utc::now(),
                queue,
            },
        );
    }

    pub fn set_state(&self, id: SubscriberId, state: SubscriberState) {
        if let Some(sub) = lock(&self.inner).get_mut(&id) {
            sub.state = state;
        }
    }

    /// Record the highest message id the client confirmed. Never moves back.
    pub fn ack(&self, id: SubscriberId, message_id: u64) {
        if let Some(sub) = lock(&self.inner).get_mut(&id) {
            sub.last_acked = Some(sub.last_acked.map_or(message_id, |prev| prev.max(message_id)));
        }
    }

    /// Drop the record and return its final view.
    pub fn remove(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        lock(&self.inner).remove(&id).map(|sub| info(id, &sub))
    }

    pub fn get(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        lock(&self.inner).get(&id).map(|sub| info(id, sub))
    }

    pub fn count(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn snapshot(&self) -> Vec<SubscriberInfo> {
        let mut subs: Vec<SubscriberInfo> = lock(&self.inner)
            .iter()
            .map(|(id, sub)| info(*id, sub))
            .collect();
        subs.sort_by_key(|s| s.connected_at);
        subs
    }
}

fn info(id: SubscriberId, sub: &Subscriber) -> SubscriberInfo {
    SubscriberInfo {
        id,
        channel: sub.channel.clone(),
        state: sub.state,
        last_acked: sub.last_acked,
        connected_at: sub.connected_at,
        queued: sub.queue.len(),
        dropped: sub.queue.dropped(),
    }
}

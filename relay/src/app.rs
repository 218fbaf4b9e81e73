use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use twitch_client::UpstreamConnection;

use crate::config::AppConfig;
use crate::hub::RelayHub;
use crate::server::subscribers::SubscriberRegistry;

/// Application shared state accessible from background loops and axum handlers.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

struct SharedStateInner {
    config: AppConfig,
    hub: RelayHub,
    /// Latest connector snapshot per monitored channel
    upstream: RwLock<HashMap<String, UpstreamConnection>>,
    subscribers: SubscriberRegistry,
    shutdown_token: CancellationToken,
}

impl SharedState {
    pub fn new(config: AppConfig) -> Self {
        let upstream = config
            .channels
            .iter()
            .map(|c| (c.clone(), UpstreamConnection::new(c.as_str())))
            .collect();

        Self {
            inner: Arc::new(SharedStateInner {
                hub: RelayHub::new(config.hub_config()),
                upstream: RwLock::new(upstream),
                subscribers: SubscriberRegistry::new(),
                shutdown_token: CancellationToken::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn server_port(&self) -> u16 {
        self.inner.config.server_port
    }

    pub fn hub(&self) -> &RelayHub {
        &self.inner.hub
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.inner.subscribers
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown_token
    }

    pub fn is_monitored(&self, channel: &str) -> bool {
        self.inner.config.channels.iter().any(|c| c == channel)
    }

    pub async fn record_upstream(&self, status: UpstreamConnection) {
        let mut upstream = self.inner.upstream.write().await;
        let last_seen = upstream
            .get(&status.channel)
            .and_then(|prev| prev.last_seen)
            .max(status.last_seen);
        upstream.insert(
            status.channel.clone(),
            UpstreamConnection {
                last_seen,
                ..status
            },
        );
    }

    pub async fn touch_upstream(&self, channel: &str, at: DateTime<Utc>) {
        if let Some(status) = self.inner.upstream.write().await.get_mut(channel) {
            status.last_seen = Some(at);
        }
    }

    pub async fn upstream_snapshot(&self) -> Vec<UpstreamConnection> {
        let upstream = self.inner.upstream.read().await;
        let mut snapshot: Vec<UpstreamConnection> = upstream.values().cloned().collect();
        snapshot.sort_by(|a, b| a.channel.cmp(&b.channel));
        snapshot
    }
}

//! Runtime application configuration loaded from the environment.

use std::time::Duration;

use anyhow::{Context, bail};
use twitch_client::{BackoffPolicy, IrcConfig};

use super::defaults::{self, DEFAULT_SETTINGS};
use super::validation::{parse_channels, validate_setting};
use crate::hub::HubConfig;

/// Runtime configuration populated from environment variables (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub channels: Vec<String>,
    pub irc_nick: String,
    pub irc_token: String,
    pub irc_url: String,
    pub server_port: u16,
    pub channel_buffer_capacity: usize,
    pub subscriber_queue_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_jitter: f64,
    pub subscriber_heartbeat_secs: u64,
    pub subscriber_idle_timeout_secs: u64,
    pub upstream_ping_interval_secs: u64,
    pub upstream_pong_timeout_secs: u64,
    pub buffer_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            irc_nick: String::new(),
            irc_token: String::new(),
            irc_url: twitch_client::TWITCH_IRC_WS_ENDPOINT.into(),
            server_port: 8080,
            channel_buffer_capacity: 200,
            subscriber_queue_capacity: 50,
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 0,
            reconnect_jitter: 0.2,
            subscriber_heartbeat_secs: 20,
            subscriber_idle_timeout_secs: 60,
            upstream_ping_interval_secs: 60,
            upstream_pong_timeout_secs: 10,
            buffer_grace_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn load() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (env, tests).
    ///
    /// Every provided value is validated; missing values fall back to the
    /// defaults in [`defaults`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        let provided = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        for key in defaults::keys() {
            if let Some(value) = provided(key) {
                validate_setting(key, &value).map_err(|e| anyhow::anyhow!("{key}: {e}"))?;
            } else if DEFAULT_SETTINGS.get(key).is_some_and(|d| d.required) {
                bail!("{key} is required");
            }
        }

        let g = |key: &str| -> String {
            provided(key).unwrap_or_else(|| defaults::get_default(key).unwrap_or_default().into())
        };

        let channels = parse_channels(&g("TWITCH_CHANNELS")).map_err(anyhow::Error::msg)?;
        if channels.is_empty() {
            bail!("TWITCH_CHANNELS must list at least one channel");
        }

        let config = Self {
            channels,
            irc_nick: g("TWITCH_IRC_NICK").to_lowercase(),
            irc_token: g("TWITCH_IRC_TOKEN"),
            irc_url: g("TWITCH_IRC_URL"),
            server_port: parse(&g("SERVER_PORT"), "SERVER_PORT")?,
            channel_buffer_capacity: parse(
                &g("CHANNEL_BUFFER_CAPACITY"),
                "CHANNEL_BUFFER_CAPACITY",
            )?,
            subscriber_queue_capacity: parse(
                &g("SUBSCRIBER_QUEUE_CAPACITY"),
                "SUBSCRIBER_QUEUE_CAPACITY",
            )?,
            reconnect_base_ms: parse(&g("RECONNECT_BASE_MS"), "RECONNECT_BASE_MS")?,
            reconnect_max_ms: parse(&g("RECONNECT_MAX_MS"), "RECONNECT_MAX_MS")?,
            reconnect_max_attempts: parse(&g("RECONNECT_MAX_ATTEMPTS"), "RECONNECT_MAX_ATTEMPTS")?,
            reconnect_jitter: parse(&g("RECONNECT_JITTER"), "RECONNECT_JITTER")?,
            subscriber_heartbeat_secs: parse(
                &g("SUBSCRIBER_HEARTBEAT_SECS"),
                "SUBSCRIBER_HEARTBEAT_SECS",
            )?,
            subscriber_idle_timeout_secs: parse(
                &g("SUBSCRIBER_IDLE_TIMEOUT_SECS"),
                "SUBSCRIBER_IDLE_TIMEOUT_SECS",
            )?,
            upstream_ping_interval_secs: parse(
                &g("UPSTREAM_PING_INTERVAL_SECS"),
                "UPSTREAM_PING_INTERVAL_SECS",
            )?,
            upstream_pong_timeout_secs: parse(
                &g("UPSTREAM_PONG_TIMEOUT_SECS"),
                "UPSTREAM_PONG_TIMEOUT_SECS",
            )?,
            buffer_grace_secs: parse(&g("BUFFER_GRACE_SECS"), "BUFFER_GRACE_SECS")?,
        };

        if !config.irc_token.is_empty() && config.irc_nick.is_empty() {
            bail!("TWITCH_IRC_NICK is required when TWITCH_IRC_TOKEN is set");
        }
        if config.reconnect_max_ms < config.reconnect_base_ms {
            bail!("RECONNECT_MAX_MS must not be smaller than RECONNECT_BASE_MS");
        }
        if config.subscriber_idle_timeout_secs <= config.subscriber_heartbeat_secs {
            tracing::warn!(
                heartbeat = config.subscriber_heartbeat_secs,
                idle_timeout = config.subscriber_idle_timeout_secs,
                "Subscriber idle timeout is not longer than the heartbeat interval"
            );
        }

        Ok(config)
    }

    pub fn is_anonymous(&self) -> bool {
        self.irc_token.is_empty()
    }

    /// Connector settings shared by every channel.
    pub fn irc_config(&self) -> IrcConfig {
        let base = if self.is_anonymous() {
            IrcConfig::anonymous()
        } else {
            IrcConfig::with_credentials(&self.irc_nick, &self.irc_token)
        };
        IrcConfig {
            url: self.irc_url.clone(),
            ping_interval: Duration::from_secs(self.upstream_ping_interval_secs),
            pong_timeout: Duration::from_secs(self.upstream_pong_timeout_secs),
            ..base
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            ceiling: Duration::from_millis(self.reconnect_max_ms),
            max_attempts: (self.reconnect_max_attempts > 0).then_some(self.reconnect_max_attempts),
            jitter: self.reconnect_jitter,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            buffer_capacity: self.channel_buffer_capacity,
            queue_capacity: self.subscriber_queue_capacity,
            grace_period: Duration::from_secs(self.buffer_grace_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.subscriber_heartbeat_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.subscriber_idle_timeout_secs)
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, anyhow::Error>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("{key}: invalid value '{value}'"))
}

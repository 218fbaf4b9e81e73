//! All setting definitions with their default values.

use std::collections::HashMap;
use std::sync::LazyLock;

type DefTuple = (&'static str, &'static str, bool, bool, &'static str);

const DEFS: &[DefTuple] = &[
    // (key, default, secret, required, description)
    ("TWITCH_CHANNELS", "", false, true, "Comma-separated channel logins to relay"),
    ("TWITCH_IRC_NICK", "", false, false, "Login used for Twitch IRC (anonymous when empty)"),
    ("TWITCH_IRC_TOKEN", "", true, false, "OAuth token for Twitch IRC (anonymous when empty)"),
    ("TWITCH_IRC_URL", "wss://irc-ws.chat.twitch.tv:443", false, false, "Twitch IRC WebSocket endpoint"),
    ("SERVER_PORT", "8080", false, false, "HTTP / WebSocket listen port"),
    ("CHANNEL_BUFFER_CAPACITY", "200", false, false, "Recent messages kept per channel"),
    ("SUBSCRIBER_QUEUE_CAPACITY", "50", false, false, "Outbound queue length per subscriber"),
    ("RECONNECT_BASE_MS", "1000", false, false, "First reconnect delay"),
    ("RECONNECT_MAX_MS", "30000", false, false, "Reconnect delay ceiling"),
    ("RECONNECT_MAX_ATTEMPTS", "0", false, false, "Reconnect attempts before giving up (0 = never)"),
    ("RECONNECT_JITTER", "0.2", false, false, "Random fraction shaved off each reconnect delay"),
    ("SUBSCRIBER_HEARTBEAT_SECS", "20", false, false, "Ping interval for subscriber connections"),
    ("SUBSCRIBER_IDLE_TIMEOUT_SECS", "60", false, false, "Silence before a subscriber is dropped"),
    ("UPSTREAM_PING_INTERVAL_SECS", "60", false, false, "Idle time before probing Twitch with PING"),
    ("UPSTREAM_PONG_TIMEOUT_SECS", "10", false, false, "Time allowed for a keepalive PING to be answered"),
    ("BUFFER_GRACE_SECS", "300", false, false, "Idle time before an orphaned channel buffer is dropped"),
];

/// A single setting definition.
#[derive(Debug, Clone)]
pub struct SettingDef {
    pub key: &'static str,
    pub default: &'static str,
    pub secret: bool,
    pub required: bool,
    pub description: &'static str,
}

/// Global setting definitions indexed by key.
pub static DEFAULT_SETTINGS: LazyLock<HashMap<&'static str, SettingDef>> = LazyLock::new(|| {
    DEFS.iter()
        .map(|&(key, default, secret, required, description)| {
            (
                key,
                SettingDef {
                    key,
                    default,
                    secret,
                    required,
                    description,
                },
            )
        })
        .collect()
});

/// Setting keys in declaration order.
pub fn keys() -> impl Iterator<Item = &'static str> {
    DEFS.iter().map(|&(key, ..)| key)
}

/// Get the default value for a setting key, or `None` if not defined.
pub fn get_default(key: &str) -> Option<&'static str> {
    DEFAULT_SETTINGS.get(key).map(|d| d.default)
}

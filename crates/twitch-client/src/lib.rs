//! Twitch chat ingestion client library.
//!
//! Provides the IRC-over-WebSocket chat connector, the IRC line codec,
//! the chat message normalizer, and the reconnection supervisor.

pub mod connection;
pub mod irc;
pub mod normalize;
pub mod reconnect;

pub use connection::{ConnectionState, IrcClient, IrcConfig, UpstreamConnection, UpstreamEvent};
pub use normalize::{ChatMessage, Normalizer};
pub use reconnect::{BackoffPolicy, Supervisor, SupervisorState};

/// Unified error type for the twitch-client crate.
#[derive(Debug, thiserror::Error)]
pub enum TwitchError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl TwitchError {
    /// Whether the reconnection supervisor should try again after this error.
    ///
    /// Rejected credentials and bad endpoints need an operator, everything
    /// else is treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth(_) | Self::UrlParse(_))
    }
}

/// Default Twitch chat endpoint (IRC over secure WebSocket).
pub const TWITCH_IRC_WS_ENDPOINT: &str = "wss://irc-ws.chat.twitch.tv:443";

/// IRCv3 capabilities requested during the handshake.
pub const IRC_CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

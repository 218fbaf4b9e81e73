//! Upstream Twitch chat connector.
//!
//! One connector loop per channel: connects to Twitch IRC over WebSocket,
//! authenticates, joins, normalizes chat lines, and reconnects through the
//! [`Supervisor`] when the link drops.

mod session;

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::irc::normalize_channel_login;
use crate::normalize::{ChatMessage, Normalizer};
use crate::reconnect::{BackoffPolicy, Supervisor, SupervisorState};
use crate::{TWITCH_IRC_WS_ENDPOINT, TwitchError};

pub use session::{IrcSession, SessionEnd};

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connector configuration shared by all channels.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub url: String,
    pub nick: String,
    /// OAuth token; `None` logs in anonymously (read-only).
    pub token: Option<String>,
    /// Idle time before the connector sends the server its own PING.
    pub ping_interval: Duration,
    /// How long that PING may go unanswered before the link counts as stale.
    pub pong_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl IrcConfig {
    /// Anonymous read-only login (`justinfanNNNNN`).
    pub fn anonymous() -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(10_000..100_000);
        Self {
            url: TWITCH_IRC_WS_ENDPOINT.to_string(),
            nick: format!("justinfan{suffix}"),
            token: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_credentials(nick: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            nick: nick.into().to_lowercase(),
            token: Some(token.into()),
            ..Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }
}

/// Lifecycle of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Joined,
    Reconnecting,
}

/// Snapshot of an upstream connection, emitted on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamConnection {
    pub channel: String,
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub given_up: bool,
    pub last_error: Option<String>,
}

impl UpstreamConnection {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            state: ConnectionState::Disconnected,
            last_seen: None,
            attempt: 0,
            next_retry_at: None,
            given_up: false,
            last_error: None,
        }
    }
}

/// Output of a connector loop.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Status(UpstreamConnection),
    Message(ChatMessage),
}

/// Owns the current [`UpstreamConnection`] snapshot and the event sender.
pub struct Reporter {
    status: UpstreamConnection,
    tx: mpsc::Sender<UpstreamEvent>,
}

impl Reporter {
    pub fn new(channel: &str, tx: mpsc::Sender<UpstreamEvent>) -> Self {
        Self {
            status: UpstreamConnection::new(channel),
            tx,
        }
    }

    pub async fn update(&mut self, f: impl FnOnce(&mut UpstreamConnection)) {
        f(&mut self.status);
        let _ = self
            .tx
            .send(UpstreamEvent::Status(self.status.clone()))
            .await;
    }

    pub fn status(&self) -> &UpstreamConnection {
        &self.status
    }

    pub async fn set_state(&mut self, state: ConnectionState) {
        self.update(|s| s.state = state).await;
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.status.last_seen = Some(at);
    }

    /// Forward a message. Returns `false` once the receiver is gone.
    pub async fn message(&mut self, msg: ChatMessage) -> bool {
        self.tx.send(UpstreamEvent::Message(msg)).await.is_ok()
    }
}

/// Twitch IRC client with auto-reconnect.
///
/// Events are delivered via `mpsc::Receiver<UpstreamEvent>`.
pub struct IrcClient;

impl IrcClient {
    /// Start the connector loop for `channel`. Returns an event receiver and
    /// shutdown sender. Dropping the shutdown sender also stops the loop.
    pub fn connect(
        config: IrcConfig,
        channel: &str,
        policy: BackoffPolicy,
    ) -> Result<(mpsc::Receiver<UpstreamEvent>, mpsc::Sender<()>), TwitchError> {
        let channel = normalize_channel_login(channel)
            .ok_or_else(|| TwitchError::Protocol(format!("invalid channel name {channel:?}")))?;
        url::Url::parse(&config.url)?;

        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(Self::run_loop(
            config,
            channel,
            Supervisor::new(policy),
            event_tx,
            shutdown_rx,
        ));
        Ok((event_rx, shutdown_tx))
    }

    async fn run_loop(
        config: IrcConfig,
        channel: String,
        mut supervisor: Supervisor,
        event_tx: mpsc::Sender<UpstreamEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut normalizer = Normalizer::new(&channel);
        let mut reporter = Reporter::new(&channel, event_tx);

        loop {
            let opened = tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(channel = %channel, "Chat connector shutdown requested");
                    reporter.set_state(ConnectionState::Disconnected).await;
                    return;
                }
                opened = IrcSession::open(&config, &channel, &mut reporter) => opened,
            };

            let result = match opened {
                Ok(mut session) => {
                    supervisor.on_connected();
                    reporter
                        .update(|s| {
                            s.attempt = 0;
                            s.next_retry_at = None;
                            s.last_error = None;
                        })
                        .await;
                    tracing::info!(channel = %channel, nick = %config.nick, "Joined Twitch chat");
                    session
                        .listen(&config, &mut normalizer, &mut reporter, &mut shutdown_rx)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(SessionEnd::Shutdown) => {
                    tracing::info!(channel = %channel, "Chat connector stopped");
                    reporter.set_state(ConnectionState::Disconnected).await;
                    return;
                }
                Ok(SessionEnd::ReconnectRequested) => {
                    tracing::info!(channel = %channel, "Twitch requested reconnect");
                    reporter.set_state(ConnectionState::Reconnecting).await;
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(
                        channel = %channel, error = %e,
                        "Chat connector failed permanently, operator action required"
                    );
                    let message = e.to_string();
                    reporter
                        .update(|s| {
                            s.state = ConnectionState::Disconnected;
                            s.last_error = Some(message);
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    let message = e.to_string();
                    match supervisor.on_failure() {
                        SupervisorState::GivenUp { attempts } => {
                            tracing::error!(
                                channel = %channel, attempts, error = %e,
                                "Chat connector gave up reconnecting"
                            );
                            reporter
                                .update(|s| {
                                    s.state = ConnectionState::Disconnected;
                                    s.given_up = true;
                                    s.next_retry_at = None;
                                    s.last_error = Some(message);
                                })
                                .await;
                            return;
                        }
                        SupervisorState::Backoff { attempt, .. } => {
                            let wait = supervisor.retry_in().unwrap_or_default();
                            tracing::warn!(
                                channel = %channel, error = %e, attempt,
                                backoff_ms = wait.as_millis() as u64,
                                "Chat connection failed, will reconnect"
                            );
                            let retry_at = chrono::Duration::from_std(wait)
                                .ok()
                                .map(|d| Utc::now() + d);
                            reporter
                                .update(|s| {
                                    s.state = ConnectionState::Reconnecting;
                                    s.attempt = attempt;
                                    s.next_retry_at = retry_at;
                                    s.last_error = Some(message);
                                })
                                .await;
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    tracing::info!(channel = %channel, "Chat connector shutdown during backoff");
                                    reporter.set_state(ConnectionState::Disconnected).await;
                                    return;
                                }
                                _ = tokio::time::sleep(wait) => {}
                            }
                        }
                        SupervisorState::Active => {}
                    }
                }
            }
        }
    }
}

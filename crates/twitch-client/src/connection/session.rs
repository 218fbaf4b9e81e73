use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as Msg;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ConnectionState, IrcConfig, Reporter};
use crate::irc::{Frame, is_auth_failure};
use crate::normalize::Normalizer;
use crate::{IRC_CAPABILITIES, TwitchError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// How a joined session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown signal received or the event receiver went away.
    Shutdown,
    /// Server sent `RECONNECT`; reconnect right away.
    ReconnectRequested,
}

/// One authenticated, joined IRC connection for a single channel.
pub struct IrcSession {
    ws: WsStream,
    channel: String,
    /// Lines received during the handshake after the awaited frame.
    pending: VecDeque<String>,
}

impl IrcSession {
    /// Connect, authenticate and join `channel`.
    ///
    /// Rejected credentials yield [`TwitchError::Auth`]; transport failures
    /// and timeouts are retryable; an unparseable handshake line is a
    /// [`TwitchError::Protocol`].
    pub async fn open(
        config: &IrcConfig,
        channel: &str,
        reporter: &mut Reporter,
    ) -> Result<Self, TwitchError> {
        let deadline = Instant::now() + config.handshake_timeout;
        reporter.set_state(ConnectionState::Connecting).await;

        tracing::info!(url = %config.url, channel, "Connecting to Twitch IRC");
        let (ws, _) = tokio::time::timeout(config.handshake_timeout, connect_async(&config.url))
            .await
            .map_err(|_| TwitchError::Timeout)??;

        let mut session = Self {
            ws,
            channel: channel.to_string(),
            pending: VecDeque::new(),
        };

        session
            .send_line(&format!("CAP REQ :{IRC_CAPABILITIES}"))
            .await?;
        if let Some(token) = &config.token {
            let token = token.trim().trim_start_matches("oauth:");
            session.send_line(&format!("PASS oauth:{token}")).await?;
        }
        session.send_line(&format!("NICK {}", config.nick)).await?;
        session
            .await_frame(deadline, |frame| matches!(frame, Frame::Welcome))
            .await?;
        reporter.set_state(ConnectionState::Authenticated).await;

        session.send_line(&format!("JOIN #{channel}")).await?;
        session
            .await_frame(deadline, |frame| {
                matches!(frame, Frame::JoinAck { channel: joined, .. } if joined == channel)
            })
            .await?;
        reporter.touch(Utc::now());
        reporter.set_state(ConnectionState::Joined).await;

        Ok(session)
    }

    /// Read frames until the session ends, forwarding chat messages.
    pub async fn listen(
        &mut self,
        config: &IrcConfig,
        normalizer: &mut Normalizer,
        reporter: &mut Reporter,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<SessionEnd, TwitchError> {
        while let Some(line) = self.pending.pop_front() {
            if let Some(end) = self.handle_line(&line, normalizer, reporter).await? {
                return Ok(end);
            }
        }

        let mut last_seen = Instant::now();
        let mut probe_sent_at: Option<Instant> = None;

        loop {
            let deadline = match probe_sent_at {
                Some(at) => at + config.pong_timeout,
                None => last_seen + config.ping_interval,
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(channel = %self.channel, "Chat session shutdown during listen");
                    let _ = self.ws.close(None).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    if probe_sent_at.is_some() {
                        tracing::warn!(channel = %self.channel, "Twitch IRC keepalive timeout");
                        return Err(TwitchError::Timeout);
                    }
                    tracing::debug!(channel = %self.channel, "Idle link, sending keepalive PING");
                    self.send_line("PING :tmi.twitch.tv").await?;
                    probe_sent_at = Some(Instant::now());
                }
                next = self.ws.next() => {
                    match next {
                        Some(Ok(Msg::Text(text))) => {
                            last_seen = Instant::now();
                            probe_sent_at = None;
                            reporter.touch(Utc::now());
                            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                                if let Some(end) = self.handle_line(line, normalizer, reporter).await? {
                                    let _ = self.ws.close(None).await;
                                    return Ok(end);
                                }
                            }
                        }
                        Some(Ok(Msg::Ping(data))) => {
                            last_seen = Instant::now();
                            probe_sent_at = None;
                            self.ws.send(Msg::Pong(data)).await?;
                        }
                        Some(Ok(Msg::Close(_))) | None => {
                            tracing::warn!(channel = %self.channel, "Twitch IRC closed by server");
                            return Err(TwitchError::Network("server closed connection".into()));
                        }
                        Some(Err(e)) => return Err(TwitchError::WebSocket(e)),
                        Some(Ok(_)) => {
                            last_seen = Instant::now();
                            probe_sent_at = None;
                        }
                    }
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        normalizer: &mut Normalizer,
        reporter: &mut Reporter,
    ) -> Result<Option<SessionEnd>, TwitchError> {
        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, line, "Skipping malformed IRC line");
                return Ok(None);
            }
        };

        match frame {
            Frame::ChatLine(chat) => {
                if chat.channel != self.channel {
                    tracing::debug!(channel = %chat.channel, "Chat line for another channel ignored");
                    return Ok(None);
                }
                match normalizer.normalize(&chat, Utc::now()) {
                    Ok(msg) => {
                        if !reporter.message(msg).await {
                            return Ok(Some(SessionEnd::Shutdown));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %self.channel, error = %e, "Dropping chat line");
                    }
                }
            }
            Frame::Ping(payload) => {
                self.send_line(&format!("PONG :{payload}")).await?;
            }
            Frame::Notice { msg_id, text, .. } => {
                if is_auth_failure(&text) {
                    return Err(TwitchError::Auth(text));
                }
                tracing::warn!(
                    channel = %self.channel,
                    msg_id = msg_id.as_deref().unwrap_or(""),
                    notice = %text,
                    "Twitch NOTICE"
                );
            }
            Frame::Reconnect => return Ok(Some(SessionEnd::ReconnectRequested)),
            Frame::Pong | Frame::Welcome | Frame::JoinAck { .. } => {}
            Frame::Unrecognized(command) => {
                tracing::debug!(channel = %self.channel, command, "Unrecognized IRC command");
            }
        }
        Ok(None)
    }

    async fn await_frame(
        &mut self,
        deadline: Instant,
        is_target: impl Fn(&Frame) -> bool,
    ) -> Result<(), TwitchError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = tokio::time::timeout(remaining, self.ws.next())
                .await
                .map_err(|_| TwitchError::Timeout)?;

            match next {
                Some(Ok(Msg::Text(text))) => {
                    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
                    while let Some(line) = lines.next() {
                        let frame = Frame::parse(line).map_err(|e| {
                            TwitchError::Protocol(format!("malformed handshake line: {e}"))
                        })?;
                        match frame {
                            Frame::Notice { ref text, .. } if is_auth_failure(text) => {
                                return Err(TwitchError::Auth(text.clone()));
                            }
                            Frame::Ping(payload) => {
                                self.send_line(&format!("PONG :{payload}")).await?;
                            }
                            frame if is_target(&frame) => {
                                self.pending.extend(lines.map(ToOwned::to_owned));
                                return Ok(());
                            }
                            frame => {
                                tracing::trace!(?frame, "Handshake frame");
                            }
                        }
                    }
                }
                Some(Ok(Msg::Ping(data))) => {
                    self.ws.send(Msg::Pong(data)).await?;
                }
                Some(Ok(Msg::Close(_))) | None => {
                    return Err(TwitchError::Network(
                        "connection closed during handshake".into(),
                    ));
                }
                Some(Err(e)) => return Err(TwitchError::WebSocket(e)),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TwitchError> {
        self.ws.send(Msg::Text(line.to_string().into())).await?;
        Ok(())
    }
}

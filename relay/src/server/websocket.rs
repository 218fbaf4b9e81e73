use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use twitch_client::ChatMessage;
use twitch_client::irc::normalize_channel_login;

use super::api::err_json;
use super::subscribers::SubscriberState;
use crate::app::SharedState;
use crate::hub::{SubscriberId, lock};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub channel: String,
    /// Last message id the client already has; replay starts after it.
    pub since: Option<u64>,
}

/// Messages a client may send. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
    Ack { id: u64 },
}

/// WebSocket upgrade handler. Unmonitored channels are refused before upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> Response {
    let Some(channel) =
        normalize_channel_login(&query.channel).filter(|c| state.is_monitored(c))
    else {
        tracing::debug!(channel = %query.channel, "Subscriber asked for unmonitored channel");
        return err_json(404, "channel is not monitored").into_response();
    };
    let since = query.since;
    ws.on_upgrade(move |socket| handle_socket(socket, state, channel, since))
}

async fn handle_socket(socket: WebSocket, state: SharedState, channel: String, since: Option<u64>) {
    let id = SubscriberId::new();
    let queue = state.hub().new_queue();
    state.subscribers().register(id, &channel, queue.clone());

    let (mut sender, mut receiver) = socket.split();
    let idle_timeout = state.config().idle_timeout();

    let buffered = state.hub().subscribe(&channel, id, &queue);
    let replay: Vec<&ChatMessage> = buffered
        .iter()
        .map(|m| &**m)
        .filter(|m| since.is_none_or(|s| m.id > s))
        .collect();
    let mut opened = match serde_json::to_string(&replay) {
        Ok(json) => send_frame(&mut sender, Message::Text(json.into()), idle_timeout, id).await,
        Err(e) => {
            tracing::error!(subscriber = %id, "Failed to encode replay: {e}");
            false
        }
    };

    // The client resumed from an id the buffer no longer holds.
    let oldest = buffered.first().map(|m| m.id);
    if let (Some(after), Some(oldest)) = (since, oldest) {
        if opened && after.saturating_add(1) < oldest {
            tracing::info!(subscriber = %id, channel = %channel, after, resumed_at = oldest, "Replay has a gap");
            let gap = serde_json::json!({ "type": "gap", "after": after, "resumed_at": oldest });
            opened = send_frame(&mut sender, Message::Text(gap.to_string().into()), idle_timeout, id).await;
        }
    }

    if opened {
        state.subscribers().set_state(id, SubscriberState::Open);
        tracing::info!(
            subscriber = %id, channel = %channel, replayed = replay.len(),
            "Subscriber connected"
        );

        let last_seen = Arc::new(Mutex::new(Instant::now()));
        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(8);

        // Queue -> client, plus heartbeat and idle detection
        let heartbeat = state.config().heartbeat_interval();
        let shutdown_token = state.shutdown_token().clone();
        let outbound = queue.clone();
        let seen = last_seen.clone();
        let mut send_task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
            loop {
                let frame = tokio::select! {
                    msg = outbound.recv() => {
                        let Some(msg) = msg else { break };
                        match serde_json::to_string(msg.as_ref()) {
                            Ok(json) => Message::Text(json.into()),
                            Err(e) => {
                                tracing::warn!(subscriber = %id, "Failed to encode message: {e}");
                                continue;
                            }
                        }
                    }
                    reply = reply_rx.recv() => {
                        let Some(reply) = reply else { break };
                        Message::Text(reply.into())
                    }
                    _ = ticker.tick() => {
                        let silent = lock(&seen).elapsed();
                        if silent > idle_timeout {
                            tracing::info!(subscriber = %id, "Subscriber missed heartbeat, closing");
                            send_frame(&mut sender, Message::Close(None), idle_timeout, id).await;
                            break;
                        }
                        Message::Ping(Default::default())
                    }
                    _ = shutdown_token.cancelled() => {
                        send_frame(&mut sender, Message::Close(None), idle_timeout, id).await;
                        break;
                    }
                };
                if !send_frame(&mut sender, frame, idle_timeout, id).await {
                    break;
                }
            }
        });

        // Client -> liveness, ping and ack handling
        let recv_state = state.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                *lock(&last_seen) = Instant::now();
                match msg {
                    Message::Text(text) => {
                        handle_client_message(&recv_state, id, &text, &reply_tx).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
    }

    state.subscribers().set_state(id, SubscriberState::Closing);
    state.hub().unsubscribe(&channel, id);
    queue.close();
    state.subscribers().set_state(id, SubscriberState::Closed);
    let (dropped, last_acked) = state
        .subscribers()
        .remove(id)
        .map_or((0, None), |info| (info.dropped, info.last_acked));
    tracing::info!(
        subscriber = %id, channel = %channel, dropped, last_acked = ?last_acked,
        "Subscriber disconnected"
    );
}

/// Send one frame, giving up once `limit` passes. A client that stops
/// reading fills the socket buffer and would otherwise park this forever.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    limit: Duration,
    id: SubscriberId,
) -> bool {
    match tokio::time::timeout(limit, sender.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(subscriber = %id, "Send failed: {e}");
            false
        }
        Err(_) => {
            tracing::info!(subscriber = %id, "Subscriber stalled on send, closing");
            false
        }
    }
}

async fn handle_client_message(
    state: &SharedState,
    id: SubscriberId,
    text: &str,
    reply_tx: &mpsc::Sender<String>,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => {
            let pong = serde_json::json!({ "type": "pong" });
            let _ = reply_tx.send(pong.to_string()).await;
        }
        Ok(ClientMessage::Ack { id: message_id }) => {
            state.subscribers().ack(id, message_id);
        }
        Err(_) => {
            tracing::debug!(subscriber = %id, "Ignoring client message: {text}");
        }
    }
}

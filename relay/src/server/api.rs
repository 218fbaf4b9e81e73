//! REST handlers: monitored channels and buffered history.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use twitch_client::ConnectionState;
use twitch_client::irc::normalize_channel_login;

use crate::app::SharedState;

type ApiResult = Result<Json<Value>, (axum::http::StatusCode, Json<Value>)>;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Standard error response.
pub fn err_json(status: u16, message: &str) -> (axum::http::StatusCode, Json<Value>) {
    (
        axum::http::StatusCode::from_u16(status)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
        Json(json!({ "status": "error", "error": message })),
    )
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /health: the process is up and serving.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /ready: at least one upstream channel is joined.
pub async fn ready(State(state): State<SharedState>) -> ApiResult {
    let upstream = state.upstream_snapshot().await;
    if upstream.iter().any(|u| u.state == ConnectionState::Joined) {
        return Ok(Json(json!({ "status": "ready" })));
    }
    let waiting: Vec<Value> = upstream
        .iter()
        .map(|u| json!({ "channel": u.channel, "state": u.state }))
        .collect();
    Err((
        axum::http::StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "not ready",
            "reason": "no upstream channel joined",
            "channels": waiting,
        })),
    ))
}

/// GET /status
pub async fn status(State(state): State<SharedState>) -> Json<Value> {
    let hub = state.hub().stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": hub.channels,
        "upstream": state.upstream_snapshot().await,
        "subscribers": state.subscribers().snapshot(),
        "subscriber_count": state.subscribers().count(),
        "backpressure_drops": hub.backpressure_drops,
    }))
}

/// GET /api/channels
pub async fn list_channels(State(state): State<SharedState>) -> Json<Value> {
    let upstream = state.upstream_snapshot().await;
    let channels: Vec<Value> = state
        .config()
        .channels
        .iter()
        .map(|channel| {
            let status = upstream.iter().find(|u| &u.channel == channel);
            json!({
                "channel": channel,
                "state": status.map(|s| s.state),
                "subscribers": state.hub().subscriber_count(channel),
            })
        })
        .collect();
    Json(json!({ "channels": channels }))
}

/// GET /api/channels/{channel}/messages
pub async fn channel_messages(
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let channel = normalize_channel_login(&channel)
        .filter(|c| state.is_monitored(c))
        .ok_or_else(|| err_json(404, "channel is not monitored"))?;

    let capacity = state.config().channel_buffer_capacity;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(capacity);
    let messages = state.hub().recent(&channel, limit);
    Ok(Json(json!({
        "channel": channel,
        "count": messages.len(),
        "messages": messages,
    })))
}

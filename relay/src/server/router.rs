use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::{api, websocket};
use crate::app::SharedState;

/// Create the axum router with all routes.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // --- Core ---
        .route("/health", get(api::health))
        .route("/ready", get(api::ready))
        .route("/status", get(api::status))
        .route("/ws", get(websocket::ws_handler))
        // --- History ---
        .route("/api/channels", get(api::list_channels))
        .route("/api/channels/{channel}/messages", get(api::channel_messages))
        // --- Middleware ---
        .layer(CorsLayer::permissive())
        .with_state(state)
}

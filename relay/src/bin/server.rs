//! Headless relay server.
//!
//! Starts the upstream connectors, the axum web server, and signal handling.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use twitch_relay_lib::app::SharedState;
use twitch_relay_lib::background;
use twitch_relay_lib::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Twitch chat relay");

    let config = twitch_relay_lib::init_config()?;
    let state = SharedState::new(config);

    let server_state = state.clone();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state).await {
            tracing::error!("Server failed: {e}");
        }
    });

    let loops = background::spawn_background(&state);

    tracing::info!(
        port = state.server_port(),
        channels = state.config().channels.len(),
        "Relay running. Press Ctrl+C to stop."
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = &mut server_handle => tracing::error!("Server exited unexpectedly"),
    }
    tracing::info!("Shutting down...");

    state.shutdown_token().cancel();
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        for handle in loops {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Background loops did not stop in time");
    }
    server_handle.abort();
    Ok(())
}

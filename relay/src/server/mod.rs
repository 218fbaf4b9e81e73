pub mod api;
pub mod router;
pub mod subscribers;
pub mod websocket;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::app::SharedState;

/// Start the axum HTTP + WebSocket server on the configured port.
pub async fn start_server(state: SharedState) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.server_port());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Relay server listening on http://{}", addr);
    serve(listener, state).await
}

/// Serve on an already-bound listener until the shutdown token fires.
pub async fn serve(listener: TcpListener, state: SharedState) -> Result<()> {
    let shutdown_token = state.shutdown_token().clone();
    let app = router::create_router(state);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    Ok(())
}

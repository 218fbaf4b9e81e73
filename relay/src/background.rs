//! Background task loops: one upstream connector per channel, buffer sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use twitch_client::{IrcClient, UpstreamEvent};

use crate::app::SharedState;

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Spawn every long-running loop. Handles finish after the shutdown token fires.
pub fn spawn_background(state: &SharedState) -> Vec<JoinHandle<()>> {
    let mut handles: Vec<JoinHandle<()>> = state
        .config()
        .channels
        .iter()
        .map(|channel| {
            let s = state.clone();
            let channel = channel.clone();
            tokio::spawn(async move { upstream_loop(s, channel).await })
        })
        .collect();

    let s = state.clone();
    handles.push(tokio::spawn(async move { buffer_sweep_loop(s).await }));
    handles
}

/// Run the chat connector for one channel and publish its messages to the hub.
///
/// Reconnects happen inside the connector, so the hub keeps the same buffer
/// and subscribers across upstream drops.
pub async fn upstream_loop(state: SharedState, channel: String) {
    let shutdown_token = state.shutdown_token().clone();
    let config = state.config();

    let (mut events, stop_tx) =
        match IrcClient::connect(config.irc_config(), &channel, config.backoff_policy()) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(channel = %channel, "Failed to start chat connector: {e}");
                return;
            }
        };

    state.hub().attach_upstream(&channel);
    tracing::info!(channel = %channel, "Upstream loop started");

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                let _ = stop_tx.send(()).await;
                // Drain so the final Disconnected status is recorded.
                while let Some(event) = events.recv().await {
                    if let UpstreamEvent::Status(status) = event {
                        state.record_upstream(status).await;
                    }
                }
                break;
            }
            event = events.recv() => match event {
                Some(UpstreamEvent::Message(msg)) => {
                    state.touch_upstream(&channel, msg.timestamp).await;
                    state.hub().publish(&channel, msg);
                }
                Some(UpstreamEvent::Status(status)) => {
                    tracing::debug!(channel = %channel, state = ?status.state, "Upstream status changed");
                    state.record_upstream(status).await;
                }
                None => {
                    tracing::warn!(channel = %channel, "Chat connector stopped");
                    break;
                }
            }
        }
    }

    state.hub().detach_upstream(&channel);
    tracing::info!(channel = %channel, "Upstream loop stopped");
}

/// Periodically drop channel buffers nobody feeds or reads.
pub async fn buffer_sweep_loop(state: SharedState) {
    let shutdown_token = state.shutdown_token().clone();
    let interval = sweep_interval(state.hub().config().grace_period);

    loop {
        if sleep_or_cancel(&shutdown_token, interval).await {
            tracing::info!("Buffer sweep loop stopped (shutdown)");
            return;
        }
        for channel in state.hub().sweep_idle(std::time::Instant::now()) {
            tracing::info!(channel = %channel, "Released idle channel buffer");
        }
    }
}

fn sweep_interval(grace: Duration) -> Duration {
    (grace / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(sweep_interval(Duration::from_secs(20)), Duration::from_secs(5));
        assert_eq!(sweep_interval(Duration::from_secs(3600)), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn sleep_or_cancel_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(!sleep_or_cancel(&token, Duration::from_millis(1)).await);
        token.cancel();
        assert!(sleep_or_cancel(&token, Duration::from_secs(60)).await);
    }
}

//! Drives the chat connector against an in-process fake Twitch IRC server.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use twitch_client::{
    BackoffPolicy, ChatMessage, ConnectionState, IrcClient, IrcConfig, UpstreamConnection,
    UpstreamEvent,
};

type ServerWs = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

/// Spawn a fake server; `handler` gets the 0-based connection index.
async fn fake_twitch<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(index, ws));
        }
    });
    (url, accepted)
}

async fn read_until(ws: &mut ServerWs, prefix: &str) -> Vec<String> {
    let mut seen = Vec::new();
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            for line in text.lines() {
                seen.push(line.to_string());
                if line.starts_with(prefix) {
                    return seen;
                }
            }
        }
    }
    seen
}

async fn send(ws: &mut ServerWs, line: &str) {
    ws.send(Message::Text(line.to_string().into())).await.unwrap();
}

async fn handshake(ws: &mut ServerWs) -> Vec<String> {
    let mut seen = read_until(ws, "NICK ").await;
    send(ws, ":tmi.twitch.tv 001 tester :Welcome, GLHF!").await;
    seen.extend(read_until(ws, "JOIN ").await);
    send(ws, ":tester!tester@tester.tmi.twitch.tv JOIN #ronni").await;
    seen
}

fn privmsg(name: &str, text: &str) -> String {
    format!(
        "@badges=subscriber/6;color=#FF0000;display-name={name} :{lower}!{lower}@{lower}.tmi.twitch.tv PRIVMSG #ronni :{text}",
        lower = name.to_lowercase()
    )
}

fn config(url: &str) -> IrcConfig {
    IrcConfig {
        url: url.to_string(),
        handshake_timeout: Duration::from_secs(2),
        ..IrcConfig::with_credentials("tester", "secret")
    }
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(10),
        ceiling: Duration::from_millis(50),
        max_attempts: None,
        jitter: 0.0,
    }
}

async fn next_message(rx: &mut mpsc::Receiver<UpstreamEvent>) -> ChatMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(UpstreamEvent::Message(msg)) => return msg,
                Some(UpstreamEvent::Status(_)) => continue,
                None => panic!("connector stopped"),
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

async fn wait_status(
    rx: &mut mpsc::Receiver<UpstreamEvent>,
    pred: impl Fn(&UpstreamConnection) -> bool,
) -> UpstreamConnection {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(UpstreamEvent::Status(status)) if pred(&status) => return status,
                Some(_) => continue,
                None => panic!("connector stopped"),
            }
        }
    })
    .await
    .expect("timed out waiting for status")
}

#[tokio::test]
async fn handshake_sends_caps_credentials_and_join() {
    let (tx, mut seen_rx) = mpsc::channel::<Vec<String>>(1);
    let (url, _) = fake_twitch(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            let seen = handshake(&mut ws).await;
            let _ = tx.send(seen).await;
            let _ = ws.next().await;
        }
    })
    .await;

    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "#Ronni", fast_policy()).unwrap();
    let joined = wait_status(&mut rx, |s| s.state == ConnectionState::Joined).await;
    assert_eq!(joined.channel, "ronni");
    assert!(joined.last_seen.is_some());

    let seen = seen_rx.recv().await.unwrap();
    assert_eq!(
        seen,
        vec![
            "CAP REQ :twitch.tv/tags twitch.tv/commands",
            "PASS oauth:secret",
            "NICK tester",
            "JOIN #ronni",
        ]
    );
}

#[tokio::test]
async fn malformed_line_is_skipped_and_next_line_delivered() {
    let (url, _) = fake_twitch(|_, mut ws| async move {
        handshake(&mut ws).await;
        send(&mut ws, "@badges=broadcaster/1;color=#FFFFFF").await;
        send(&mut ws, &privmsg("Alice", "hello")).await;
        send(&mut ws, &privmsg("Bob", "world")).await;
        let _ = ws.next().await;
    })
    .await;

    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "ronni", fast_policy()).unwrap();
    let first = next_message(&mut rx).await;
    assert_eq!((first.id, first.username.as_str(), first.body.as_str()), (1, "Alice", "hello"));
    assert_eq!(first.badges, vec!["subscriber/6"]);
    assert_eq!(first.color.as_deref(), Some("#FF0000"));

    let second = next_message(&mut rx).await;
    assert_eq!((second.id, second.username.as_str()), (2, "Bob"));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (tx, mut pong_rx) = mpsc::channel::<String>(1);
    let (url, _) = fake_twitch(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            handshake(&mut ws).await;
            send(&mut ws, "PING :tmi.twitch.tv").await;
            let seen = read_until(&mut ws, "PONG").await;
            let _ = tx.send(seen.last().cloned().unwrap_or_default()).await;
            let _ = ws.next().await;
        }
    })
    .await;

    let (_rx, _shutdown) = IrcClient::connect(config(&url), "ronni", fast_policy()).unwrap();
    let pong = tokio::time::timeout(WAIT, pong_rx.recv()).await.unwrap().unwrap();
    assert_eq!(pong, "PONG :tmi.twitch.tv");
}

#[tokio::test]
async fn reconnects_after_drop_and_keeps_id_sequence() {
    let (url, accepted) = fake_twitch(|index, mut ws| async move {
        handshake(&mut ws).await;
        if index == 0 {
            send(&mut ws, &privmsg("Alice", "before")).await;
            let _ = ws.close(None).await;
        } else {
            send(&mut ws, &privmsg("Alice", "after")).await;
            let _ = ws.next().await;
        }
    })
    .await;

    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "ronni", fast_policy()).unwrap();
    let before = next_message(&mut rx).await;
    let reconnecting =
        wait_status(&mut rx, |s| s.state == ConnectionState::Reconnecting).await;
    assert_eq!(reconnecting.attempt, 1);
    assert!(reconnecting.last_error.is_some());

    let after = next_message(&mut rx).await;
    assert_eq!((before.id, after.id), (1, 2));
    assert_eq!(after.body, "after");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn server_requested_reconnect_skips_backoff() {
    let (url, accepted) = fake_twitch(|index, mut ws| async move {
        handshake(&mut ws).await;
        if index == 0 {
            send(&mut ws, ":tmi.twitch.tv RECONNECT").await;
        } else {
            send(&mut ws, &privmsg("Alice", "fresh")).await;
        }
        let _ = ws.next().await;
    })
    .await;

    let policy = BackoffPolicy {
        base: Duration::from_secs(60),
        ceiling: Duration::from_secs(60),
        ..fast_policy()
    };
    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "ronni", policy).unwrap();
    let msg = next_message(&mut rx).await;
    assert_eq!(msg.body, "fresh");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let (url, accepted) = fake_twitch(|_, mut ws| async move {
        read_until(&mut ws, "NICK ").await;
        send(&mut ws, ":tmi.twitch.tv NOTICE * :Login authentication failed").await;
        let _ = ws.next().await;
    })
    .await;

    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "ronni", fast_policy()).unwrap();
    let failed = wait_status(&mut rx, |s| s.last_error.is_some()).await;
    assert_eq!(failed.state, ConnectionState::Disconnected);
    assert!(!failed.given_up);
    assert!(failed.last_error.unwrap().contains("Login authentication failed"));

    let closed = tokio::time::timeout(WAIT, async { while rx.recv().await.is_some() {} }).await;
    assert!(closed.is_ok(), "connector should stop after auth failure");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (url, accepted) = fake_twitch(|_, ws| async move {
        drop(ws);
    })
    .await;

    let policy = BackoffPolicy {
        max_attempts: Some(2),
        ..fast_policy()
    };
    let (mut rx, _shutdown) = IrcClient::connect(config(&url), "ronni", policy).unwrap();
    let status = wait_status(&mut rx, |s| s.given_up).await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn silent_upstream_is_detected_as_stale() {
    let (url, accepted) = fake_twitch(|_, mut ws| async move {
        handshake(&mut ws).await;
        // Swallow everything, including keepalive PINGs.
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let cfg = IrcConfig {
        ping_interval: Duration::from_millis(50),
        pong_timeout: Duration::from_millis(50),
        ..config(&url)
    };
    let (mut rx, _shutdown) = IrcClient::connect(cfg, "ronni", fast_policy()).unwrap();
    let status = wait_status(&mut rx, |s| s.state == ConnectionState::Reconnecting).await;
    assert_eq!(status.last_error.as_deref(), Some("Connection timeout"));
    tokio::time::timeout(WAIT, async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn websocket_pings_keep_an_unanswered_keepalive_link_open() {
    let (url, accepted) = fake_twitch(|_, mut ws| async move {
        handshake(&mut ws).await;
        // Never answer the IRC keepalive PING, only send transport-level pings.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            if ws.send(Message::Ping(Default::default())).await.is_err() {
                return;
            }
        }
        let _ = ws.next().await;
    })
    .await;

    let cfg = IrcConfig {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(300),
        ..config(&url)
    };
    let (mut rx, _shutdown) = IrcClient::connect(cfg, "ronni", fast_policy()).unwrap();
    wait_status(&mut rx, |s| s.state == ConnectionState::Joined).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    while let Ok(event) = rx.try_recv() {
        if let UpstreamEvent::Status(status) = event {
            assert_ne!(status.state, ConnectionState::Reconnecting, "link declared stale");
        }
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let (url, _) = fake_twitch(|_, mut ws| async move {
        handshake(&mut ws).await;
        let _ = ws.next().await;
    })
    .await;

    let (mut rx, shutdown) = IrcClient::connect(config(&url), "ronni", fast_policy()).unwrap();
    wait_status(&mut rx, |s| s.state == ConnectionState::Joined).await;
    shutdown.send(()).await.unwrap();
    let last = wait_status(&mut rx, |s| s.state == ConnectionState::Disconnected).await;
    assert!(last.last_error.is_none());
}

#[test]
fn rejects_invalid_channel_names() {
    let err = IrcClient::connect(IrcConfig::anonymous(), "not a channel", fast_policy());
    assert!(err.is_err());
}

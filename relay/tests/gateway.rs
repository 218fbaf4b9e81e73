//! Drives the subscriber gateway over a real listener.

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use twitch_client::{ChatMessage, ConnectionState, UpstreamConnection};
use twitch_relay_lib::app::SharedState;
use twitch_relay_lib::config::AppConfig;
use twitch_relay_lib::server;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> AppConfig {
    AppConfig {
        channels: vec!["ronni".into()],
        channel_buffer_capacity: 3,
        ..AppConfig::default()
    }
}

async fn start(config: AppConfig) -> (SharedState, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let state = SharedState::new(config);
    let s = state.clone();
    tokio::spawn(async move { server::serve(listener, s).await.unwrap() });
    (state, addr)
}

fn msg(id: u64) -> ChatMessage {
    ChatMessage {
        id,
        channel: "ronni".into(),
        username: format!("User{id}"),
        body: format!("hello {id}"),
        timestamp: Utc::now(),
        badges: vec!["subscriber/6".into()],
        color: Some("#1E90FF".into()),
    }
}

async fn connect(addr: &str, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?{query}")).await.unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

fn ids(replay: &Value) -> Vec<u64> {
    replay
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_u64().unwrap())
        .collect()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn replay_then_live_messages() {
    let (state, addr) = start(test_config()).await;
    for id in 1..=4 {
        state.hub().publish("ronni", msg(id));
    }

    let mut ws = connect(&addr, "channel=ronni").await;
    let replay = next_json(&mut ws).await;
    assert_eq!(ids(&replay), vec![2, 3, 4]);

    state.hub().publish("ronni", msg(5));
    let live = next_json(&mut ws).await;
    assert_eq!(live["id"], 5);
    assert_eq!(live["channel"], "ronni");
    assert_eq!(live["username"], "User5");
    assert_eq!(live["body"], "hello 5");
    assert_eq!(live["badges"], serde_json::json!(["subscriber/6"]));
    assert_eq!(live["color"], "#1E90FF");
    assert!(live["timestamp"].is_string());
}

#[tokio::test]
async fn empty_channel_replays_empty_array() {
    let (_state, addr) = start(test_config()).await;
    let mut ws = connect(&addr, "channel=Ronni").await;
    assert_eq!(next_json(&mut ws).await, serde_json::json!([]));
}

#[tokio::test]
async fn since_skips_messages_the_client_already_has() {
    let config = AppConfig {
        channel_buffer_capacity: 10,
        ..test_config()
    };
    let (state, addr) = start(config).await;
    for id in 1..=5 {
        state.hub().publish("ronni", msg(id));
    }

    let mut ws = connect(&addr, "channel=ronni&since=3").await;
    assert_eq!(ids(&next_json(&mut ws).await), vec![4, 5]);
}

#[tokio::test]
async fn unmonitored_channel_is_rejected() {
    let (_state, addr) = start(test_config()).await;
    match connect_async(format!("ws://{addr}/ws?channel=shroud")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(e) => panic!("expected 404, got {e}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn ping_is_answered_and_ack_recorded() {
    let (state, addr) = start(test_config()).await;
    let mut ws = connect(&addr, "channel=ronni").await;
    next_json(&mut ws).await;

    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, serde_json::json!({ "type": "pong" }));

    ws.send(Message::Text(r#"{"type":"ack","id":4}"#.into())).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();
    eventually(|| {
        state
            .subscribers()
            .snapshot()
            .first()
            .is_some_and(|s| s.last_acked == Some(4))
    })
    .await;
}

#[tokio::test]
async fn closing_the_client_releases_the_subscriber() {
    let (state, addr) = start(test_config()).await;
    let mut ws = connect(&addr, "channel=ronni").await;
    next_json(&mut ws).await;
    assert_eq!(state.hub().subscriber_count("ronni"), 1);
    assert_eq!(state.subscribers().count(), 1);

    ws.close(None).await.unwrap();
    eventually(|| state.hub().subscriber_count("ronni") == 0).await;
    eventually(|| state.subscribers().count() == 0).await;

    // Publishing after the disconnect must not fail or resurrect it.
    state.hub().publish("ronni", msg(1));
    assert_eq!(state.hub().subscriber_count("ronni"), 0);
}

#[tokio::test]
async fn silent_client_is_dropped_after_idle_timeout() {
    let config = AppConfig {
        subscriber_heartbeat_secs: 1,
        subscriber_idle_timeout_secs: 1,
        ..test_config()
    };
    let (state, addr) = start(config).await;
    let mut ws = connect(&addr, "channel=ronni").await;
    next_json(&mut ws).await;

    // Not reading means the server's pings are never answered.
    eventually(|| state.subscribers().count() == 0).await;
    assert_eq!(state.hub().subscriber_count("ronni"), 0);
}

#[tokio::test]
async fn slow_client_does_not_hold_back_others() {
    let config = AppConfig {
        channel_buffer_capacity: 100,
        subscriber_queue_capacity: 2,
        ..test_config()
    };
    let (state, addr) = start(config).await;
    let mut fast = connect(&addr, "channel=ronni").await;
    let _slow = connect(&addr, "channel=ronni").await;
    next_json(&mut fast).await;
    eventually(|| state.hub().subscriber_count("ronni") == 2).await;

    for id in 1..=50 {
        state.hub().publish("ronni", msg(id));
        assert_eq!(next_json(&mut fast).await["id"], id);
    }
}

#[tokio::test]
async fn http_endpoints_report_channels_and_history() {
    let (state, addr) = start(test_config()).await;
    for id in 1..=3 {
        state.hub().publish("ronni", msg(id));
    }
    let http = reqwest::Client::new();

    let status: Value = http
        .get(format!("http://{addr}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["channels"][0]["channel"], "ronni");
    assert_eq!(status["channels"][0]["buffered"], 3);
    assert_eq!(status["upstream"][0]["state"], "disconnected");
    assert_eq!(status["subscriber_count"], 0);

    let channels: Value = http
        .get(format!("http://{addr}/api/channels"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(channels["channels"][0]["channel"], "ronni");

    let history: Value = http
        .get(format!("http://{addr}/api/channels/ronni/messages?limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&history["messages"]), vec![2, 3]);

    let missing = http
        .get(format!("http://{addr}/api/channels/shroud/messages"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn stalled_reader_is_reclaimed() {
    let config = AppConfig {
        subscriber_heartbeat_secs: 1,
        subscriber_idle_timeout_secs: 2,
        ..test_config()
    };
    let (state, addr) = start(config).await;
    let mut ws = connect(&addr, "channel=ronni").await;
    next_json(&mut ws).await;
    assert_eq!(state.subscribers().count(), 1);

    // Stop reading while enough data is published to fill the socket.
    let body = "x".repeat(1 << 20);
    for id in 1..=64 {
        let mut big = msg(id);
        big.body = body.clone();
        state.hub().publish("ronni", big);
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while state.subscribers().count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("stalled subscriber was never released");
    assert_eq!(state.hub().subscriber_count("ronni"), 0);
    drop(ws);
}

#[tokio::test]
async fn resume_past_the_buffer_reports_a_gap() {
    let (state, addr) = start(test_config()).await;
    for id in 1..=6 {
        state.hub().publish("ronni", msg(id));
    }

    let mut behind = connect(&addr, "channel=ronni&since=1").await;
    assert_eq!(ids(&next_json(&mut behind).await), vec![4, 5, 6]);
    assert_eq!(
        next_json(&mut behind).await,
        serde_json::json!({ "type": "gap", "after": 1, "resumed_at": 4 })
    );

    let mut current = connect(&addr, "channel=ronni&since=3").await;
    assert_eq!(ids(&next_json(&mut current).await), vec![4, 5, 6]);
    eventually(|| state.hub().subscriber_count("ronni") == 2).await;
    state.hub().publish("ronni", msg(7));
    assert_eq!(next_json(&mut current).await["id"], 7);
    assert_eq!(next_json(&mut behind).await["id"], 7);
}

#[tokio::test]
async fn health_is_always_up_and_ready_follows_upstream() {
    let (state, addr) = start(test_config()).await;
    let http = reqwest::Client::new();

    let health = http.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.json::<Value>().await.unwrap(), serde_json::json!({ "status": "healthy" }));

    let waiting = http.get(format!("http://{addr}/ready")).send().await.unwrap();
    assert_eq!(waiting.status(), 503);
    let body: Value = waiting.json().await.unwrap();
    assert_eq!(body["status"], "not ready");
    assert_eq!(body["channels"][0]["channel"], "ronni");
    assert_eq!(body["channels"][0]["state"], "disconnected");

    state
        .record_upstream(UpstreamConnection {
            state: ConnectionState::Joined,
            ..UpstreamConnection::new("ronni")
        })
        .await;
    let ready = http.get(format!("http://{addr}/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);
    assert_eq!(ready.json::<Value>().await.unwrap(), serde_json::json!({ "status": "ready" }));
}

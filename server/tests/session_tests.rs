//! Push-channel session tests over a real socket.
//!
//! Validates:
//! - `ready` first, with the heartbeat interval
//! - Heartbeats on schedule with increasing ids
//! - Published webhooks streamed as default-type events
//! - Unsubscribe on client disconnect
//! - Server close ending live sessions

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webhook_relay_core::event::{MultiValue, RelayEvent};
use webhook_relay_core::event_bus::EventBus;
use webhook_relay_core::local::LocalEventBus;
use webhook_relay_server::config::ServerConfig;
use webhook_relay_server::{RelayServer, ServerHandle};
use webhook_relay_testing::{TEST_TIMESTAMP_MILLIS, eventually, test_clock, within};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    bus: Arc<LocalEventBus>,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

async fn start(heartbeat: Duration, auth_token: Option<&str>) -> Running {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval: heartbeat,
        auth_token: auth_token.map(ToString::to_string),
        ..ServerConfig::default()
    };
    let bus = Arc::new(LocalEventBus::new());
    let server = RelayServer::bind(&config, Arc::clone(&bus) as Arc<dyn EventBus>)
        .await
        .unwrap()
        .with_clock(Arc::new(test_clock()));
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.serve(std::future::pending()));
    Running {
        addr,
        bus,
        handle,
        task,
    }
}

/// One SSE frame as `field -> value`.
type Frame = HashMap<String, String>;

struct SseReader {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            body: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let raw: String = self.buffer.drain(..end + 2).collect();
                return Some(
                    raw.lines()
                        .filter_map(|line| line.split_once(':'))
                        .map(|(field, value)| {
                            let value = value.strip_prefix(' ').unwrap_or(value);
                            (field.to_string(), value.to_string())
                        })
                        .collect(),
                );
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                _ => return None,
            }
        }
    }

    async fn expect_frame(&mut self) -> Frame {
        within(WAIT, self.next_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended early")
    }
}

async fn subscribe(addr: SocketAddr, channel: &str) -> (reqwest::header::HeaderMap, SseReader) {
    let response = reqwest::get(format!("http://{addr}/subscribe/{channel}"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    (response.headers().clone(), SseReader::new(response))
}

#[tokio::test]
async fn test_session_starts_with_ready_and_heartbeats() {
    let server = start(Duration::from_millis(100), None).await;
    let (headers, mut reader) = subscribe(server.addr, "test").await;

    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let ready = reader.expect_frame().await;
    assert_eq!(ready["id"], "0");
    assert_eq!(ready["event"], "ready");
    assert_eq!(ready["data"], r#"{"heartbeatInterval":100}"#);

    for expected_id in 1..=2 {
        let heartbeat = reader.expect_frame().await;
        assert_eq!(heartbeat["id"], expected_id.to_string());
        assert_eq!(heartbeat["event"], "heartbeat");
        assert_eq!(heartbeat["data"], "{}");
    }
}

#[tokio::test]
async fn test_published_webhook_is_streamed() {
    let server = start(Duration::from_secs(60), None).await;
    let (_, mut reader) = subscribe(server.addr, "test").await;
    reader.expect_frame().await;
    assert_eq!(server.bus.subscribers_count("test"), 1);

    let status = reqwest::Client::new()
        .post(format!("http://{}/webhooks/test?a=1&b=2&c=3", server.addr))
        .header("content-type", "application/json")
        .body(r#"{"test":true}"#)
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::OK);

    let message = reader.expect_frame().await;
    assert_eq!(message["id"], "1");
    assert!(!message.contains_key("event"));

    let event: RelayEvent = serde_json::from_str(&message["data"]).unwrap();
    assert_eq!(event.body, r#"{"test":true}"#);
    assert_eq!(event.path, "/webhooks/test");
    assert_eq!(event.timestamp, TEST_TIMESTAMP_MILLIS);
    assert_eq!(
        event.headers.get("content-type"),
        Some(&MultiValue::One("application/json".to_string()))
    );
    for (name, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        assert_eq!(event.query.get(name), Some(&MultiValue::One(value.to_string())));
    }
}

#[tokio::test]
async fn test_other_channel_receives_nothing() {
    let server = start(Duration::from_secs(60), None).await;
    let (_, mut reader) = subscribe(server.addr, "A").await;
    reader.expect_frame().await;

    reqwest::Client::new()
        .post(format!("http://{}/webhooks/B", server.addr))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert!(within(Duration::from_millis(300), reader.next_frame()).await.is_none());
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    // Heartbeat writes surface the closed socket.
    let server = start(Duration::from_millis(100), None).await;
    let (_, mut first) = subscribe(server.addr, "test").await;
    let (_, mut second) = subscribe(server.addr, "test").await;
    first.expect_frame().await;
    second.expect_frame().await;
    assert_eq!(server.bus.subscribers_count("test"), 2);

    drop(first);
    assert!(eventually(WAIT, || server.bus.subscribers_count("test") == 1).await);

    drop(second);
    assert!(eventually(WAIT, || server.bus.subscribers_count("test") == 0).await);
}

#[tokio::test]
async fn test_rejected_session_never_subscribes() {
    let server = start(Duration::from_secs(60), Some("secret")).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/subscribe/test", server.addr);

    let rejected = client.get(&url).send().await.unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(server.bus.subscribers_count("test"), 0);

    let accepted = client
        .get(&url)
        .header("x-auth-token", "secret")
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::OK);
    let mut reader = SseReader::new(accepted);
    assert_eq!(reader.expect_frame().await["event"], "ready");
}

#[tokio::test]
async fn test_close_ends_sessions_and_drains() {
    let server = start(Duration::from_secs(60), None).await;
    let (_, mut reader) = subscribe(server.addr, "test").await;
    reader.expect_frame().await;

    server.handle.close();
    assert!(server.handle.is_closed());

    assert!(within(WAIT, reader.next_frame()).await.expect("stream should end").is_none());
    within(WAIT, server.task)
        .await
        .expect("server should drain")
        .unwrap()
        .unwrap();
    assert_eq!(server.bus.subscribers_count("test"), 0);
}

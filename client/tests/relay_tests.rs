//! End-to-end relay tests: producer → relay server → relay client → target.
//!
//! The relay server runs in-process on an ephemeral port; the target is a
//! `wiremock` server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use webhook_relay_client::{ClientConfig, ConnectionState, RelayClient};
use webhook_relay_core::event_bus::EventBus;
use webhook_relay_core::local::LocalEventBus;
use webhook_relay_server::RelayServer;
use webhook_relay_server::config::ServerConfig;
use webhook_relay_testing::{eventually, init_test_tracing, test_clock};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

async fn relay(auth_token: Option<&str>) -> (SocketAddr, Arc<LocalEventBus>) {
    init_test_tracing();
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval: Duration::from_millis(100),
        auth_token: auth_token.map(ToString::to_string),
        ..ServerConfig::default()
    };
    let bus = Arc::new(LocalEventBus::new());
    let server = RelayServer::bind(&config, Arc::clone(&bus) as Arc<dyn EventBus>)
        .await
        .unwrap()
        .with_clock(Arc::new(test_clock()));
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve(std::future::pending()));
    (addr, bus)
}

fn client(
    relay: SocketAddr,
    channel: &str,
    target: &MockServer,
    token: Option<&str>,
) -> RelayClient {
    let mut config = ClientConfig::new(
        &format!("http://{relay}/subscribe/{channel}"),
        &target.uri(),
    )
    .unwrap();
    config.auth_token = token.map(ToString::to_string);
    config.reconnect_interval = Duration::from_millis(50);
    config.watchdog_grace = Duration::from_millis(500);
    RelayClient::new(config).unwrap()
}

async fn subscribed(bus: &LocalEventBus, channel: &str, client: &RelayClient) {
    assert!(eventually(WAIT, || bus.subscribers_count(channel) == 1).await);
    let mut state = client.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Subscribed))
        .await
        .expect("client should subscribe")
        .unwrap();
}

async fn post(relay: SocketAddr, path_and_query: &str, body: &str) {
    let status = reqwest::Client::new()
        .post(format!("http://{relay}{path_and_query}"))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_reaches_target_verbatim() {
    let (addr, bus) = relay(None).await;
    let target = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhooks/test"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"test":true}"#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&target)
        .await;

    let client = client(addr, "test", &target, None);
    client.start();
    subscribed(&bus, "test", &client).await;

    post(addr, "/webhooks/test", r#"{"test":true}"#).await;

    assert!(eventually(WAIT, || client.stats().forwarded == 1).await);
    assert_eq!(client.stats().failed, 0);
    client.close();
    target.verify().await;
}

#[tokio::test]
async fn test_other_channel_is_not_forwarded() {
    let (addr, bus) = relay(None).await;
    let target = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&target)
        .await;

    let client = client(addr, "A", &target, None);
    client.start();
    subscribed(&bus, "A", &client).await;

    post(addr, "/webhooks/B", "{}").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(target.received_requests().await.unwrap().is_empty());

    post(addr, "/webhooks/A", "{}").await;
    assert!(eventually(WAIT, || client.stats().forwarded == 1).await);
    client.close();
}

#[tokio::test]
async fn test_query_and_subpath_are_preserved() {
    let (addr, bus) = relay(None).await;
    let target = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhooks/test/push-github"))
        .and(query_param("a", "1"))
        .and(query_param("b", "2"))
        .and(query_param("c", "3"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&target)
        .await;

    let client = client(addr, "test", &target, None);
    client.start();
    subscribed(&bus, "test", &client).await;

    post(addr, "/webhooks/test/push-github?a=1&b=2&c=3", r#"{"test":true}"#).await;

    assert!(eventually(WAIT, || client.stats().forwarded == 1).await);
    client.close();
    target.verify().await;
}

#[tokio::test]
async fn test_target_failure_keeps_the_stream() {
    let (addr, bus) = relay(None).await;
    let target = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&target)
        .await;

    let client = client(addr, "test", &target, None);
    client.start();
    subscribed(&bus, "test", &client).await;

    post(addr, "/webhooks/test", "{}").await;
    post(addr, "/webhooks/test", "{}").await;

    assert!(eventually(WAIT, || client.stats().failed == 2).await);
    assert_eq!(client.state(), ConnectionState::Subscribed);
    assert_eq!(client.stats().reconnects, 0);
    client.close();
}

#[tokio::test]
async fn test_token_protected_relay() {
    let (addr, bus) = relay(Some("secret")).await;
    let target = MockServer::start().await;

    let rejected = client(addr, "test", &target, Some("wrong"));
    rejected.start();
    assert!(eventually(WAIT, || rejected.stats().reconnects >= 2).await);
    assert_eq!(bus.subscribers_count("test"), 0);
    rejected.close();

    let accepted = client(addr, "test", &target, Some("secret"));
    accepted.start();
    subscribed(&bus, "test", &accepted).await;
    accepted.close();
}

#[tokio::test]
async fn test_close_unsubscribes_from_relay() {
    let (addr, bus) = relay(None).await;
    let target = MockServer::start().await;

    let client = client(addr, "test", &target, None);
    client.start();
    subscribed(&bus, "test", &client).await;

    client.close();
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(eventually(WAIT, || bus.subscribers_count("test") == 0).await);
}

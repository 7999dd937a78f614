//! Router tests for ingress, auth and probes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use std::sync::Arc;
use std::time::Duration;
use webhook_relay_core::event::{MultiValue, RelayEvent};
use webhook_relay_core::event_bus::{
    BusFuture, EventBus, EventBusError, Listener, ListenerRegistry, ReadinessCallbacks,
    SubscriptionId,
};
use webhook_relay_core::local::LocalEventBus;
use webhook_relay_server::{AppState, relay_router};
use webhook_relay_testing::{RecordingListener, TEST_TIMESTAMP_MILLIS, test_clock};

fn test_server(
    bus: Arc<dyn EventBus>,
    configure: impl FnOnce(AppState) -> AppState,
) -> TestServer {
    let (state, _sessions) = AppState::new(bus, Duration::from_secs(5));
    let state = configure(state.with_clock(Arc::new(test_clock())));
    TestServer::new(relay_router(state)).expect("router should build")
}

/// Bus whose publishes always fail.
#[derive(Default)]
struct FailingBus {
    registry: ListenerRegistry,
}

impl EventBus for FailingBus {
    fn start(&self, _callbacks: ReadinessCallbacks) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) {}

    fn subscribe(&self, channel: &str, listener: Listener) -> SubscriptionId {
        self.registry.subscribe(channel, listener)
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(channel, id)
    }

    fn subscribers_count(&self, channel: &str) -> usize {
        self.registry.count(channel)
    }

    fn publish(&self, channel: &str, _event: &RelayEvent) -> BusFuture<'_, ()> {
        let channel = channel.to_string();
        Box::pin(async move {
            Err(EventBusError::PublishFailed {
                channel,
                reason: "connection reset".to_string(),
            })
        })
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_publish_delivers_normalized_event() {
    let bus = Arc::new(LocalEventBus::new());
    let recorder = RecordingListener::new();
    bus.subscribe("test", recorder.listener());
    let server = test_server(bus, |s| s);

    let response = server
        .post("/webhooks/test/push-github?a=1&b=2&c=3")
        .add_header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        )
        .bytes(r#"{"test":true}"#.into())
        .await;

    response.assert_status_ok();
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.body, r#"{"test":true}"#);
    assert_eq!(event.path, "/webhooks/test/push-github");
    assert_eq!(event.original_url, "/webhooks/test/push-github?a=1&b=2&c=3");
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
async fn test_publish_keeps_form_body_raw() {
    let bus = Arc::new(LocalEventBus::new());
    let recorder = RecordingListener::new();
    bus.subscribe("forms", recorder.listener());
    let server = test_server(bus, |s| s);

    server
        .post("/webhooks/forms")
        .add_header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        )
        .bytes("payload=%7B%22a%22%3A1%7D&x=y".into())
        .await
        .assert_status_ok();

    assert_eq!(recorder.events()[0].body, "payload=%7B%22a%22%3A1%7D&x=y");
}

#[tokio::test]
async fn test_publish_without_subscribers_succeeds() {
    let server = test_server(Arc::new(LocalEventBus::new()), |s| s);
    server.post("/webhooks/nobody").text("{}").await.assert_status_ok();
}

#[tokio::test]
async fn test_publish_only_reaches_its_channel() {
    let bus = Arc::new(LocalEventBus::new());
    let on_a = RecordingListener::new();
    let on_b = RecordingListener::new();
    bus.subscribe("A", on_a.listener());
    bus.subscribe("B", on_b.listener());
    let server = test_server(bus, |s| s);

    server.post("/webhooks/B").text("{}").await.assert_status_ok();

    assert!(on_a.is_empty());
    assert_eq!(on_b.len(), 1);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let bus = Arc::new(LocalEventBus::new());
    let recorder = RecordingListener::new();
    bus.subscribe("test", recorder.listener());
    let server = test_server(bus, |s| s.with_max_payload_size(16));

    let response = server.post("/webhooks/test").text("x".repeat(64)).await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(recorder.is_empty());
}

#[tokio::test]
async fn test_publish_failure_is_server_error() {
    let server = test_server(Arc::new(FailingBus::default()), |s| s);

    let response = server.post("/webhooks/test").text("{}").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
}

#[tokio::test]
async fn test_subscribe_requires_configured_token() {
    let bus = Arc::new(LocalEventBus::new());
    let server = test_server(Arc::clone(&bus) as Arc<dyn EventBus>, |s| {
        s.with_auth_token(Some("secret"))
    });

    server
        .get("/subscribe/test")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/subscribe/test")
        .add_header(
            HeaderName::from_static("x-auth-token"),
            HeaderValue::from_static("wrong"),
        )
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    assert_eq!(bus.subscribers_count("test"), 0);
}

#[tokio::test]
async fn test_publish_is_not_token_protected() {
    let server = test_server(Arc::new(LocalEventBus::new()), |s| {
        s.with_auth_token(Some("secret"))
    });
    server.post("/webhooks/test").text("{}").await.assert_status_ok();
}

#[tokio::test]
async fn test_probes_follow_readiness_flags() {
    let bus = Arc::new(LocalEventBus::new());
    bus.start(ReadinessCallbacks::noop()).await.unwrap();
    let (state, _sessions) = AppState::new(bus, Duration::from_secs(5));
    let readiness = Arc::clone(&state.readiness);
    let server = TestServer::new(relay_router(state)).unwrap();

    server.get("/health").await.assert_status_ok();
    server
        .get("/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    readiness.mark_listening();
    readiness.mark_bus_ready();
    server.get("/ready").await.assert_status_ok();

    readiness.mark_bus_failed();
    server
        .get("/health")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server
        .get("/metrics")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_ready_needs_a_connected_bus() {
    // Flags say ready, but the bus was never started and has no link.
    let bus = Arc::new(LocalEventBus::new());
    let (state, _sessions) =
        AppState::new(Arc::clone(&bus) as Arc<dyn EventBus>, Duration::from_secs(5));
    let readiness = Arc::clone(&state.readiness);
    let server = TestServer::new(relay_router(state)).unwrap();

    readiness.mark_listening();
    readiness.mark_bus_ready();
    let response = server.get("/ready").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "degraded");

    bus.start(ReadinessCallbacks::noop()).await.unwrap();
    server.get("/ready").await.assert_status_ok();

    // Liveness is unaffected by a dropped link.
    bus.close();
    server
        .get("/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server.get("/health").await.assert_status_ok();
}

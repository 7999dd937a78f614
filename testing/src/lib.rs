//! # Webhook Relay Testing
//!
//! Testing utilities and helpers for the webhook relay.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic event timestamps
//! - [`RecordingListener`], an event bus listener that remembers what it saw
//! - Event fixtures
//! - [`spawn_router`] to serve an axum router on an ephemeral port
//! - [`eventually`] to poll a condition with a deadline
//!
//! ## Example
//!
//! ```
//! use webhook_relay_core::event_bus::EventBus;
//! use webhook_relay_core::local::LocalEventBus;
//! use webhook_relay_testing::{RecordingListener, fixtures};
//!
//! # async fn example() {
//! let bus = LocalEventBus::new();
//! let recorder = RecordingListener::new();
//! bus.subscribe("test", recorder.listener());
//!
//! bus.publish("test", &fixtures::json_event("/webhooks/test", r#"{"test":true}"#))
//!     .await
//!     .unwrap();
//! assert_eq!(recorder.len(), 1);
//! # }
//! ```

use axum::Router;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use webhook_relay_core::environment::Clock;
use webhook_relay_core::event::RelayEvent;
use webhook_relay_core::event_bus::Listener;

pub use mocks::{FixedClock, TEST_TIMESTAMP_MILLIS, test_clock};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Milliseconds since the epoch reported by [`test_clock`].
    pub const TEST_TIMESTAMP_MILLIS: i64 = 1_735_689_600_000;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use webhook_relay_testing::mocks::FixedClock;
    /// use webhook_relay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp_millis(TEST_TIMESTAMP_MILLIS).unwrap_or_default())
    }
}

/// Event bus listener that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<RelayEvent>>>,
}

impl RecordingListener {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Listener`] feeding this recorder. Can be registered more than once.
    #[must_use]
    pub fn listener(&self) -> Listener {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &RelayEvent| {
            events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        })
    }

    /// Snapshot of the recorded events, in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<RelayEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Event fixtures.
pub mod fixtures {
    use super::{RelayEvent, TEST_TIMESTAMP_MILLIS};

    /// A JSON webhook with a `content-type` header, stamped with the test clock.
    #[must_use]
    pub fn json_event(original_url: &str, body: &str) -> RelayEvent {
        RelayEvent::builder(original_url)
            .header("content-type", "application/json")
            .body(body)
            .timestamp(TEST_TIMESTAMP_MILLIS)
            .build()
    }

    /// A GitHub-style push delivery on channel `test`.
    #[must_use]
    pub fn github_push() -> RelayEvent {
        RelayEvent::builder("/webhooks/test/push-github?delivery=42")
            .header("content-type", "application/json")
            .header("x-github-event", "push")
            .query_param("delivery", "42")
            .body(r#"{"ref":"refs/heads/main"}"#)
            .timestamp(TEST_TIMESTAMP_MILLIS)
            .build()
    }
}

/// Serve a router on `127.0.0.1` with an ephemeral port.
///
/// The server runs until the test runtime shuts down.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound.
pub async fn spawn_router(router: Router) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Test server failed");
        }
    });
    Ok(addr)
}

/// Poll `check` every 10ms until it returns `true` or `timeout` elapses.
///
/// Returns the last result of `check`.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future`, failing with `None` if it takes longer than `timeout`.
pub async fn within<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, future).await.ok()
}

/// Install a test-friendly tracing subscriber once; later calls are no-ops.
///
/// Honors `RUST_LOG`, defaulting to `warn`.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

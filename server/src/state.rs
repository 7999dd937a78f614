//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webhook_relay_core::environment::{Clock, SystemClock};
use webhook_relay_core::event_bus::EventBus;
use webhook_relay_runtime::health::ReadinessState;
use webhook_relay_runtime::metrics::MetricsRecorder;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Event bus shared by every session and ingress request
    pub bus: Arc<dyn EventBus>,
    /// Timestamp source for published events
    pub clock: Arc<dyn Clock>,
    /// Flags behind `/health` and `/ready`
    pub readiness: Arc<ReadinessState>,
    /// Heartbeat period announced to and used for every session
    pub heartbeat_interval: Duration,
    /// Outbound queue capacity per session
    pub session_buffer: usize,
    /// Ingress body limit in bytes
    pub max_payload_size: usize,
    /// Token required on subscribe requests
    pub auth_token: Option<Arc<str>>,
    /// Flips to `true` when live sessions must end
    pub shutdown: watch::Receiver<bool>,
    /// Prometheus recorder behind `/metrics`
    pub metrics: Option<Arc<MetricsRecorder>>,
}

impl AppState {
    /// State with a system clock, fresh readiness flags and no auth.
    ///
    /// Returns the sender that ends live sessions.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        heartbeat_interval: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let state = Self {
            bus,
            clock: Arc::new(SystemClock),
            readiness: Arc::new(ReadinessState::new()),
            heartbeat_interval,
            session_buffer: 256,
            max_payload_size: 1024 * 1024,
            auth_token: None,
            shutdown,
            metrics: None,
        };
        (state, shutdown_tx)
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Require `token` on subscribe requests.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<&str>) -> Self {
        self.auth_token = token.map(Arc::from);
        self
    }

    /// Set the per-session outbound queue capacity (at least one).
    #[must_use]
    pub fn with_session_buffer(mut self, capacity: usize) -> Self {
        self.session_buffer = capacity.max(1);
        self
    }

    /// Set the ingress body limit.
    #[must_use]
    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Serve metrics from `recorder`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }
}

//! Prometheus metrics for the relay server and client.
//!
//! Components record through the small recorder types below; the server binary
//! installs the Prometheus recorder once with [`MetricsRecorder::install`] and
//! serves [`MetricsRecorder::render`] on `GET /metrics`. When no recorder is
//! installed the `metrics` macros are no-ops, so libraries and tests can record
//! unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use webhook_relay_runtime::metrics::{MetricsRecorder, PublishMetrics};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! PublishMetrics::record_published(Duration::from_millis(2));
//! let text = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs a
    /// warning and leaves [`render`](Self::render) returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Ingress
    describe_counter!(
        "relay_events_published_total",
        "Total number of webhook requests accepted into the event bus"
    );
    describe_counter!(
        "relay_publish_failures_total",
        "Total number of webhook requests whose publish failed"
    );
    describe_histogram!(
        "relay_publish_duration_seconds",
        "Time taken to publish an event to the bus"
    );

    // Push-channel sessions
    describe_gauge!(
        "relay_sessions_active",
        "Number of currently connected push-channel sessions"
    );
    describe_counter!(
        "relay_sessions_total",
        "Total number of push-channel sessions opened"
    );
    describe_counter!(
        "relay_events_streamed_total",
        "Total number of events written to push-channel sessions"
    );
    describe_counter!(
        "relay_events_dropped_total",
        "Total number of events dropped because a session buffer was full"
    );

    // Event bus
    describe_counter!(
        "relay_eventbus_reconnects_total",
        "Total number of backing-store reconnection attempts"
    );

    // Client
    describe_counter!(
        "relay_events_forwarded_total",
        "Total number of events forwarded to the target, by outcome"
    );
    describe_histogram!(
        "relay_forward_duration_seconds",
        "Time taken by forward requests to the target"
    );
    describe_counter!(
        "relay_client_recoveries_total",
        "Total number of watchdog-triggered client recoveries"
    );
}

/// Ingress metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record an accepted publish.
    pub fn record_published(duration: Duration) {
        counter!("relay_events_published_total").increment(1);
        histogram!("relay_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed publish.
    pub fn record_failure() {
        counter!("relay_publish_failures_total").increment(1);
    }
}

/// Push-channel session metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// Record a session opening.
    pub fn record_opened() {
        counter!("relay_sessions_total").increment(1);
        gauge!("relay_sessions_active").increment(1.0);
    }

    /// Record a session ending.
    pub fn record_closed() {
        gauge!("relay_sessions_active").decrement(1.0);
    }

    /// Record an event written to a session.
    pub fn record_streamed() {
        counter!("relay_events_streamed_total").increment(1);
    }

    /// Record an event dropped for a slow session.
    pub fn record_dropped() {
        counter!("relay_events_dropped_total").increment(1);
    }
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a reconnection attempt on the given link (`publisher` or `subscriber`).
    pub fn record_reconnect(link: &'static str) {
        counter!("relay_eventbus_reconnects_total", "link" => link).increment(1);
    }
}

/// Outcome label for forwarded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Target answered with a 2xx status
    Success,
    /// Target answered with a non-2xx status
    Rejected,
    /// Request failed or timed out
    Failed,
}

impl ForwardOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Relay client metrics recorder.
pub struct ClientMetrics;

impl ClientMetrics {
    /// Record a forward attempt.
    pub fn record_forward(outcome: ForwardOutcome, duration: Duration) {
        counter!("relay_events_forwarded_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("relay_forward_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a watchdog-triggered recovery.
    pub fn record_recovery() {
        counter!("relay_client_recoveries_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_uninstalled_recorder_renders_nothing() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.render().is_none());
    }

    #[test]
    fn test_install_and_render() {
        let mut recorder = MetricsRecorder::new();
        recorder.install().unwrap();

        PublishMetrics::record_published(Duration::from_millis(5));
        SessionMetrics::record_opened();
        ClientMetrics::record_forward(ForwardOutcome::Success, Duration::from_millis(10));

        // Another test may have installed the recorder first.
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("relay_events_published_total"));
            assert!(rendered.contains("relay_sessions_active"));
            assert!(rendered.contains("outcome=\"success\""));
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ForwardOutcome::Success.as_str(), "success");
        assert_eq!(ForwardOutcome::Rejected.as_str(), "rejected");
        assert_eq!(ForwardOutcome::Failed.as_str(), "failed");
    }
}

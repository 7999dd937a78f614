//! Health, readiness and metrics endpoints.
//!
//! Used by load balancers, orchestrators and scrapers. They read the flags the
//! bus callbacks and the server lifecycle maintain; `/ready` also asks the bus
//! whether its link is up right now.

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use webhook_relay_runtime::health::{HealthReport, HealthStatus};

/// Liveness.
///
/// # Status Codes
///
/// - 200 OK: the process is serving
/// - 503 Service Unavailable: the event bus gave up reconnecting
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.readiness.liveness();
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// Readiness.
///
/// Only fully healthy is ready: the listener is up, the event bus is ready and
/// currently connected, and shutdown has not begun.
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "degraded",
///   "checks": [{ "component": "event_bus", "status": "degraded", "message": "connecting" }],
///   "timestamp": "2025-01-01T00:00:00Z"
/// }
/// ```
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.readiness.readiness(state.bus.is_ready());
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// Prometheus text exposition.
///
/// # Errors
///
/// Returns 503 when no recorder was installed by this process.
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .metrics
        .as_ref()
        .and_then(|recorder| recorder.render())
        .ok_or_else(|| AppError::unavailable("Metrics recorder not installed"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use webhook_relay_core::event_bus::{EventBus, ReadinessCallbacks};
    use webhook_relay_core::local::LocalEventBus;

    fn state() -> AppState {
        AppState::new(Arc::new(LocalEventBus::new()), Duration::from_secs(5)).0
    }

    async fn started_state() -> AppState {
        let bus = Arc::new(LocalEventBus::new());
        bus.start(ReadinessCallbacks::noop()).await.unwrap();
        AppState::new(bus, Duration::from_secs(5)).0
    }

    #[tokio::test]
    async fn test_ready_requires_listener_and_bus() {
        let state = started_state().await;
        let (status, _) = ready(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.readiness.mark_listening();
        state.readiness.mark_bus_ready();
        let (status, Json(report)) = ready(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(report.is_healthy());

        state.readiness.mark_shutting_down();
        let (status, _) = ready(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_follows_live_bus_state() {
        let state = state();
        state.readiness.mark_listening();
        state.readiness.mark_bus_ready();

        // The flag alone is not enough while the bus reports no link.
        let (status, Json(report)) = ready(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, HealthStatus::Degraded);

        state.bus.start(ReadinessCallbacks::noop()).await.unwrap();
        let (status, _) = ready(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);

        state.bus.close();
        let (status, _) = ready(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_fails_once_bus_gives_up() {
        let state = state();
        let (status, _) = health(State(state.clone())).await;
        assert_eq!(status, StatusCode::OK);

        state.readiness.mark_bus_failed();
        let (status, Json(report)) = health(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_unavailable() {
        let err = metrics(State(state())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

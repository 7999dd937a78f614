//! Liveness and readiness state.
//!
//! [`ReadinessState`] is shared between the event bus callbacks, the HTTP
//! listener and the shutdown coordinator. The `/health` and `/ready` endpoints
//! read it through [`ReadinessState::liveness`] and [`ReadinessState::readiness`].

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component works but is not ready for traffic (e.g., still connecting)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall system status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall system status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// Timestamp when report was generated
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Create a new health report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// Process-wide readiness flags.
#[derive(Debug, Default)]
pub struct ReadinessState {
    listening: AtomicBool,
    bus_ready: AtomicBool,
    bus_failed: AtomicBool,
    shutting_down: AtomicBool,
}

impl ReadinessState {
    /// All flags cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The HTTP listener is bound and accepting.
    pub fn mark_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    /// The event bus reported ready.
    pub fn mark_bus_ready(&self) {
        self.bus_failed.store(false, Ordering::SeqCst);
        self.bus_ready.store(true, Ordering::SeqCst);
    }

    /// The event bus gave up reconnecting.
    pub fn mark_bus_failed(&self) {
        self.bus_ready.store(false, Ordering::SeqCst);
        self.bus_failed.store(true, Ordering::SeqCst);
    }

    /// Shutdown has begun; readiness stays false from here on.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Liveness: unhealthy only once the bus is terminally not-ready.
    #[must_use]
    pub fn liveness(&self) -> HealthReport {
        let bus = if self.bus_failed.load(Ordering::SeqCst) {
            HealthCheck::unhealthy("event_bus", "reconnect attempts exhausted")
        } else {
            HealthCheck::healthy("event_bus")
        };
        HealthReport::new(vec![bus])
    }

    /// Readiness: healthy only when listening, bus ready and not shutting down.
    ///
    /// `bus_connected` is the bus's live view. The ready flag is only set once,
    /// so a link that drops after startup shows up here as reconnecting.
    #[must_use]
    pub fn readiness(&self, bus_connected: bool) -> HealthReport {
        let listener = if self.listening.load(Ordering::SeqCst) {
            HealthCheck::healthy("listener")
        } else {
            HealthCheck::degraded("listener", "not accepting connections yet")
        };

        let bus = if self.bus_failed.load(Ordering::SeqCst) {
            HealthCheck::unhealthy("event_bus", "reconnect attempts exhausted")
        } else if !self.bus_ready.load(Ordering::SeqCst) {
            HealthCheck::degraded("event_bus", "connecting")
        } else if bus_connected {
            HealthCheck::healthy("event_bus")
        } else {
            HealthCheck::degraded("event_bus", "reconnecting")
        };

        let lifecycle = if self.is_shutting_down() {
            HealthCheck::degraded("lifecycle", "shutting down")
        } else {
            HealthCheck::healthy("lifecycle")
        };

        HealthReport::new(vec![listener, bus, lifecycle])
    }
}

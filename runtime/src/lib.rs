//! # Webhook Relay Runtime
//!
//! Runtime utilities shared by the relay server, the relay client and the
//! replicated event bus.
//!
//! ## Components
//!
//! - **Backoff**: stateless exponential delay calculation for reconnects
//! - **Timers**: the session heartbeat ticker and the client watchdog
//! - **Health**: liveness and readiness flags behind `/health` and `/ready`
//! - **Shutdown**: ordered graceful teardown and the fatal error reporter
//! - **Metrics**: Prometheus recorder and per-component metric helpers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff for reconnection scheduling
pub mod backoff;

/// Liveness and readiness state
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Heartbeat and watchdog timers
pub mod timers;

pub use backoff::{BackoffError, ExponentialBackoff};
pub use health::{HealthCheck, HealthReport, HealthStatus, ReadinessState};
pub use shutdown::{ShutdownCoordinator, ShutdownError};
pub use timers::{Watchdog, heartbeat_interval};

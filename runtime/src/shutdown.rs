//! Graceful shutdown coordination and fatal error reporting.
//!
//! The composition root of each binary builds one [`ShutdownCoordinator`],
//! registers its teardown steps in order (flip readiness, stop accepting, drain,
//! close the event bus) and awaits [`wait_for_signal`]. Running the coordinator
//! broadcasts the shutdown signal to every subscriber, then executes the steps
//! one after another under a single hard timeout.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use webhook_relay_runtime::shutdown::{ShutdownCoordinator, wait_for_signal};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
//! let mut signal = coordinator.subscribe();
//!
//! coordinator.step("server", || async { Ok(()) });
//! coordinator.step("event-bus", || async { Ok(()) });
//!
//! wait_for_signal().await?;
//! coordinator.shutdown().await?;
//! assert!(*signal.borrow_and_update());
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Errors from a shutdown run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The whole sequence did not finish within the hard timeout
    #[error("Shutdown timed out after {0:?}")]
    TimedOut(Duration),
    /// One or more steps reported an error; later steps still ran
    #[error("Shutdown completed with failed steps: {}", .0.join(", "))]
    StepsFailed(Vec<String>),
}

type StepFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct Step {
    name: String,
    run: StepFn,
}

/// Ordered teardown sequence with a hard timeout.
pub struct ShutdownCoordinator {
    steps: Vec<Step>,
    timeout: Duration,
    signal: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose full sequence must finish within `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            steps: Vec::new(),
            timeout,
            signal,
        }
    }

    /// Append a teardown step. Steps run in registration order.
    pub fn step<F, Fut>(&mut self, name: impl Into<String>, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let name = name.into();
        info!(step = %name, "Registered shutdown step");
        self.steps.push(Step {
            name,
            run: Box::new(move || Box::pin(run())),
        });
    }

    /// Receiver that flips to `true` when shutdown begins.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Number of registered steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Broadcast the shutdown signal and run every step in order.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::TimedOut`] if the sequence exceeds the timeout, or
    /// [`ShutdownError::StepsFailed`] naming each step that failed.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        info!(
            steps = self.steps.len(),
            timeout_ms = self.timeout.as_millis(),
            "Initiating graceful shutdown"
        );
        self.signal.send_replace(true);

        let steps = self.steps;
        let sequence = async move {
            let mut failures = Vec::new();
            for step in steps {
                info!(step = %step.name, "Running shutdown step");
                if let Err(e) = (step.run)().await {
                    error!(step = %step.name, error = %e, "Shutdown step failed");
                    failures.push(format!("{}: {e}", step.name));
                }
            }
            failures
        };

        match tokio::time::timeout(self.timeout, sequence).await {
            Ok(failures) if failures.is_empty() => {
                info!("Shutdown complete");
                Ok(())
            }
            Ok(failures) => Err(ShutdownError::StepsFailed(failures)),
            Err(_) => {
                error!(timeout_ms = self.timeout.as_millis(), "Shutdown timed out");
                Err(ShutdownError::TimedOut(self.timeout))
            }
        }
    }
}

/// Wait for SIGINT, SIGTERM or SIGHUP and return the signal name.
///
/// # Errors
///
/// Returns an I/O error if a signal handler cannot be registered.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            "SIGINT"
        }
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
    };
    warn!(signal = name, "Received shutdown signal");
    Ok(name)
}

/// Wait for Ctrl+C and return the signal name.
///
/// # Errors
///
/// Returns an I/O error if the handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    warn!(signal = "ctrl_c", "Received shutdown signal");
    Ok("ctrl_c")
}

/// Route panics from any thread to `tracing::error!`.
///
/// A panicking task is logged with its message and location instead of
/// disappearing silently; the process keeps serving.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        error!(panic = %message, location = %location, "Unhandled panic");
    }));
}

//! Session heartbeat and client watchdog timers.
//!
//! Both timers are plain values owned by a single task and polled from its
//! `tokio::select!` loop, so re-arming is always stop-then-start on the same
//! deadline and a timer can never be left double-armed.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Deadline that fires when no liveness signal arrives in time.
///
/// An unarmed watchdog never fires.
#[derive(Debug, Clone, Default)]
pub struct Watchdog {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Create an unarmed watchdog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: None,
            deadline: None,
        }
    }

    /// Arm with a new timeout, replacing any previous deadline.
    pub fn arm(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Push the deadline out by the current timeout.
    ///
    /// Does nothing while stopped; a heartbeat that arrives before `ready`
    /// must not arm the watchdog.
    pub fn reset(&mut self) {
        if self.deadline.is_some() {
            if let Some(timeout) = self.timeout {
                self.deadline = Some(Instant::now() + timeout);
            }
        }
    }

    /// Disarm.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The configured timeout, if the watchdog was ever armed.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve at the current deadline, or never when unarmed.
    ///
    /// The returned future captures the deadline by value; call again after
    /// re-arming.
    pub fn expired(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        }
    }
}

/// Recurring heartbeat ticker for one push-channel session.
///
/// The first tick fires one full `period` after creation, and late ticks are
/// delayed instead of bursting. A zero period is raised to one millisecond.
#[must_use]
pub fn heartbeat_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

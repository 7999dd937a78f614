//! Exponential backoff for reconnection scheduling.
//!
//! The delay for a zero-based attempt is
//!
//! ```text
//! delay = min(round(random × max(initial_timeout, 1ms) × factor^attempt), max_timeout)
//! ```
//!
//! where `random` is `1` unless randomization is enabled, in which case it is drawn
//! uniformly from `[1, 2)`. The calculation is stateless: callers keep their own
//! attempt counter and reset it after a successful reconnect.
//!
//! # Example
//!
//! ```rust
//! use webhook_relay_runtime::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::builder()
//!     .factor(2.0)
//!     .initial_timeout(Duration::from_millis(100))
//!     .max_timeout(Duration::from_secs(1))
//!     .build();
//!
//! assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
//! assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(1));
//! ```

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Invalid backoff settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// Factor is NaN, infinite or below one
    #[error("Backoff factor must be a finite number >= 1, got {0}")]
    InvalidFactor(f64),
    /// Maximum timeout below one millisecond
    #[error("Backoff max timeout must be at least 1ms, got {0:?}")]
    InvalidMaxTimeout(Duration),
}

/// Exponential backoff configuration.
///
/// # Default Values
///
/// - `factor`: 1.0 (constant delay)
/// - `initial_timeout`: 1 second
/// - `max_timeout`: none (unbounded)
/// - `randomize`: false
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Growth factor applied per attempt
    pub factor: f64,
    /// Delay for attempt zero (clamped to at least 1ms)
    pub initial_timeout: Duration,
    /// Upper bound for any delay; `None` leaves delays unbounded
    pub max_timeout: Option<Duration>,
    /// Multiply each delay by a random factor in `[1, 2)`
    pub randomize: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            factor: 1.0,
            initial_timeout: Duration::from_millis(1000),
            max_timeout: None,
            randomize: false,
        }
    }
}

impl ExponentialBackoff {
    /// Create a new builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder {
            inner: Self::default(),
        }
    }

    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError`] if the factor is not a finite number `>= 1`, or the
    /// maximum timeout is shorter than one millisecond.
    pub fn validate(&self) -> Result<(), BackoffError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(BackoffError::InvalidFactor(self.factor));
        }
        if let Some(max) = self.max_timeout {
            if max < Duration::from_millis(1) {
                return Err(BackoffError::InvalidMaxTimeout(max));
            }
        }
        Ok(())
    }

    /// Delay before the given zero-based reconnection attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let random = if self.randomize {
            rand::thread_rng().gen_range(1.0..2.0)
        } else {
            1.0
        };
        self.delay_with_random(attempt, random)
    }

    /// Float-to-int casts saturate, so an unbounded growth stays at `u64::MAX` ms.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let initial_ms = (self.initial_timeout.as_millis() as f64).max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut delay_ms = (random * initial_ms * self.factor.powi(exponent)).round();

        if let Some(max) = self.max_timeout {
            delay_ms = delay_ms.min(max.as_millis() as f64);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`ExponentialBackoff`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoffBuilder {
    inner: ExponentialBackoff,
}

impl ExponentialBackoffBuilder {
    /// Set the growth factor.
    #[must_use]
    pub const fn factor(mut self, factor: f64) -> Self {
        self.inner.factor = factor;
        self
    }

    /// Set the delay for the first attempt.
    #[must_use]
    pub const fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.inner.initial_timeout = timeout;
        self
    }

    /// Cap every delay at `timeout`.
    #[must_use]
    pub const fn max_timeout(mut self, timeout: Duration) -> Self {
        self.inner.max_timeout = Some(timeout);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn randomize(mut self, randomize: bool) -> Self {
        self.inner.randomize = randomize;
        self
    }

    /// Build the backoff.
    #[must_use]
    pub fn build(self) -> ExponentialBackoff {
        self.inner
    }
}

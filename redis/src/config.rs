//! Configuration for [`RedisEventBus`](crate::RedisEventBus).

use std::time::Duration;
use webhook_relay_core::event_bus::EventBusError;
use webhook_relay_runtime::backoff::ExponentialBackoff;

/// Default shared topic carrying every channel.
pub const DEFAULT_TOPIC: &str = "global";

/// Replicated bus settings.
///
/// # Default Values
///
/// - `url`: `redis://127.0.0.1:6379`
/// - `topic`: `global`
/// - `backoff`: factor 1, initial 1s, unbounded
/// - `max_reconnect_attempts`: unlimited
/// - `max_retries_per_request`: unlimited
/// - `enable_offline_queue`: true
/// - `enable_ready_check`: true
/// - `ping_interval`: 5 seconds
/// - `connect_timeout`: 10 seconds
#[derive(Debug, Clone, PartialEq)]
pub struct RedisEventBusConfig {
    /// Backing-store connection URL
    pub url: String,
    /// Shared topic all instances publish to and subscribe on
    pub topic: String,
    /// Delay schedule between reconnection attempts
    pub backoff: ExponentialBackoff,
    /// Reconnection attempts allowed per connection before giving up; `None` is unlimited
    pub max_reconnect_attempts: Option<u32>,
    /// Failed reconnects a queued publish survives before failing; `None` is unlimited
    pub max_retries_per_request: Option<u32>,
    /// Queue publishes while the publisher connection is down
    pub enable_offline_queue: bool,
    /// Wait for the store to finish loading its dataset before reporting ready
    pub enable_ready_check: bool,
    /// Publisher liveness probe period
    pub ping_interval: Duration,
    /// Bound on each connection attempt and each probe
    pub connect_timeout: Duration,
}

impl Default for RedisEventBusConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            backoff: ExponentialBackoff::default(),
            max_reconnect_attempts: None,
            max_retries_per_request: None,
            enable_offline_queue: true,
            enable_ready_check: true,
            ping_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RedisEventBusConfig {
    /// Check the settings that cannot be corrected at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::InvalidConfiguration`] for an empty topic, a bad
    /// backoff, or zero-length probe and connect timeouts.
    pub fn validate(&self) -> Result<(), EventBusError> {
        if self.topic.is_empty() {
            return Err(EventBusError::InvalidConfiguration(
                "topic must not be empty".to_string(),
            ));
        }
        self.backoff
            .validate()
            .map_err(|e| EventBusError::InvalidConfiguration(e.to_string()))?;
        if self.ping_interval.is_zero() || self.connect_timeout.is_zero() {
            return Err(EventBusError::InvalidConfiguration(
                "ping interval and connect timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RedisEventBus`](crate::RedisEventBus).
#[derive(Debug, Clone, Default)]
pub struct RedisEventBusBuilder {
    config: RedisEventBusConfig,
}

impl RedisEventBusBuilder {
    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the shared topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    /// Set the reconnection backoff.
    #[must_use]
    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Cap reconnection attempts per connection.
    #[must_use]
    pub const fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Cap how many failed reconnects a queued publish waits through.
    #[must_use]
    pub const fn max_retries_per_request(mut self, retries: Option<u32>) -> Self {
        self.config.max_retries_per_request = retries;
        self
    }

    /// Enable or disable queueing publishes while disconnected.
    #[must_use]
    pub const fn enable_offline_queue(mut self, enabled: bool) -> Self {
        self.config.enable_offline_queue = enabled;
        self
    }

    /// Enable or disable the loading check after connect.
    #[must_use]
    pub const fn enable_ready_check(mut self, enabled: bool) -> Self {
        self.config.enable_ready_check = enabled;
        self
    }

    /// Set the publisher liveness probe period.
    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the per-attempt connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Build the bus without connecting.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::InvalidConfiguration`] if the URL cannot be parsed
    /// or the settings are invalid.
    pub fn build(self) -> Result<crate::RedisEventBus, EventBusError> {
        crate::RedisEventBus::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RedisEventBusConfig::default();
        assert_eq!(config.topic, "global");
        assert!(config.enable_offline_queue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_topic_and_bad_backoff() {
        let empty = RedisEventBusConfig {
            topic: String::new(),
            ..RedisEventBusConfig::default()
        };
        assert!(matches!(
            empty.validate(),
            Err(EventBusError::InvalidConfiguration(_))
        ));

        let shrinking = RedisEventBusConfig {
            backoff: ExponentialBackoff::builder().factor(0.1).build(),
            ..RedisEventBusConfig::default()
        };
        assert!(matches!(
            shrinking.validate(),
            Err(EventBusError::InvalidConfiguration(_))
        ));
    }
}

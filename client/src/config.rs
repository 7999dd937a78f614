//! Relay client configuration.
//!
//! Loaded from environment variables. Both URLs are validated up front so a
//! typo fails at startup instead of at the first reconnect.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be used
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Relay client settings.
///
/// # Default Values
///
/// - `source_url`: `http://127.0.0.1:3000/subscribe/test`
/// - `target_base_url`: `http://127.0.0.1:3001`
/// - `reconnect_interval`: 1 second
/// - `watchdog_grace`: 3 seconds
/// - `forward_timeout`: 10 seconds
/// - `connect_timeout`: 10 seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Full subscribe URL, channel included
    pub source_url: Url,
    /// Base URL events are forwarded under
    pub target_base_url: Url,
    /// Sent as `x-auth-token` on subscribe
    pub auth_token: Option<String>,
    /// Pause before reopening a failed stream
    pub reconnect_interval: Duration,
    /// Added to the server's heartbeat interval to form the watchdog timeout
    pub watchdog_grace: Duration,
    /// Bound on each forward request
    pub forward_timeout: Duration,
    /// Bound on opening the stream
    pub connect_timeout: Duration,
}

/// Subscribe URL used when `SOURCE_URL` is unset.
pub const DEFAULT_SOURCE_URL: &str = "http://127.0.0.1:3000/subscribe/test";

/// Target used when `TARGET_BASE_URL` is unset.
pub const DEFAULT_TARGET_BASE_URL: &str = "http://127.0.0.1:3001";

impl ClientConfig {
    /// Settings for the given source and target, with default timings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either URL is not an absolute `http`/`https` URL.
    pub fn new(source_url: &str, target_base_url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            source_url: parse_url("SOURCE_URL", source_url)?,
            target_base_url: parse_url("TARGET_BASE_URL", target_base_url)?,
            auth_token: None,
            reconnect_interval: Duration::from_millis(1000),
            watchdog_grace: Duration::from_millis(3000),
            forward_timeout: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(10_000),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string());
        let source = get("SOURCE_URL").unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());
        let target = get("TARGET_BASE_URL").unwrap_or_else(|| DEFAULT_TARGET_BASE_URL.to_string());

        let config = Self {
            source_url: parse_url("SOURCE_URL", &source)?,
            target_base_url: parse_url("TARGET_BASE_URL", &target)?,
            auth_token: get("AUTH_TOKEN").filter(|t| !t.is_empty()),
            reconnect_interval: millis(
                get("RECONNECT_INTERVAL_MS"),
                "RECONNECT_INTERVAL_MS",
                1000,
            )?,
            watchdog_grace: millis(get("WATCHDOG_GRACE_MS"), "WATCHDOG_GRACE_MS", 3000)?,
            forward_timeout: millis(get("FORWARD_TIMEOUT_MS"), "FORWARD_TIMEOUT_MS", 10_000)?,
            connect_timeout: millis(get("CONNECT_TIMEOUT_MS"), "CONNECT_TIMEOUT_MS", 10_000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the timing rules.
    ///
    /// The stream must be able to reconnect within the watchdog grace, and the
    /// request timeouts must be non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_interval >= self.watchdog_grace {
            return Err(ConfigError::Invalid {
                name: "RECONNECT_INTERVAL_MS",
                value: self.reconnect_interval.as_millis().to_string(),
                reason: format!(
                    "must be smaller than WATCHDOG_GRACE_MS ({})",
                    self.watchdog_grace.as_millis()
                ),
            });
        }
        for (name, value) in [
            ("FORWARD_TIMEOUT_MS", self.forward_timeout),
            ("CONNECT_TIMEOUT_MS", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    name,
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

fn millis(
    raw: Option<String>,
    name: &'static str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => u64::from_str(&raw)
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value: raw,
            }),
        None => Ok(Duration::from_millis(default_ms)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(
            config,
            ClientConfig::new(DEFAULT_SOURCE_URL, DEFAULT_TARGET_BASE_URL).unwrap()
        );
        assert_eq!(config.source_url.path(), "/subscribe/test");
        assert_eq!(config.watchdog_grace, Duration::from_secs(3));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SOURCE_URL", "https://relay.example.com/subscribe/github"),
            ("TARGET_BASE_URL", "http://localhost:8080/api"),
            ("AUTH_TOKEN", "secret"),
            ("RECONNECT_INTERVAL_MS", "500"),
            ("WATCHDOG_GRACE_MS", "2000"),
        ])
        .unwrap();

        assert_eq!(config.source_url.host_str(), Some("relay.example.com"));
        assert_eq!(config.target_base_url.path(), "/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.reconnect_interval, Duration::from_millis(500));
        assert_eq!(config.watchdog_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_urls_must_be_http() {
        assert!(matches!(
            load(&[("SOURCE_URL", "ftp://relay/subscribe/test")]),
            Err(ConfigError::Invalid { name: "SOURCE_URL", .. })
        ));
        assert!(matches!(
            load(&[("TARGET_BASE_URL", "localhost:3001")]),
            Err(ConfigError::Invalid { name: "TARGET_BASE_URL", .. })
        ));
        assert!(ClientConfig::new("not a url", "http://localhost").is_err());
    }

    #[test]
    fn test_reconnect_must_fit_in_watchdog_grace() {
        assert!(matches!(
            load(&[("RECONNECT_INTERVAL_MS", "3000")]),
            Err(ConfigError::Invalid { name: "RECONNECT_INTERVAL_MS", .. })
        ));
        assert!(load(&[("RECONNECT_INTERVAL_MS", "2999")]).is_ok());
    }

    #[test]
    fn test_malformed_numbers_are_errors() {
        assert!(matches!(
            load(&[("FORWARD_TIMEOUT_MS", "soon")]),
            Err(ConfigError::Invalid { name: "FORWARD_TIMEOUT_MS", .. })
        ));
        assert!(load(&[("CONNECT_TIMEOUT_MS", "0")]).is_err());
    }
}

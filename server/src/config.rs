//! Configuration management for the relay server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Malformed values are errors; the binary refuses to start on any of them.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use webhook_relay_redis::RedisEventBusConfig;
use webhook_relay_runtime::backoff::ExponentialBackoff;

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
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

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP and session settings
    pub server: ServerConfig,
    /// Graceful shutdown timing
    pub shutdown: ShutdownConfig,
    /// Replicated bus settings; `None` selects the in-process bus
    pub redis: Option<RedisEventBusConfig>,
}

/// HTTP and session settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to (0 picks an ephemeral port)
    pub port: u16,
    /// Heartbeat period for push-channel sessions
    pub heartbeat_interval: Duration,
    /// Maximum accepted ingress body size in bytes
    pub max_payload_size: usize,
    /// Outbound queue capacity per session
    pub session_buffer: usize,
    /// Shared token required on subscribe requests
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            heartbeat_interval: Duration::from_millis(5000),
            max_payload_size: 1024 * 1024,
            session_buffer: 256,
            auth_token: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Graceful shutdown timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Pause between flipping readiness and tearing down
    pub delay: Duration,
    /// Grace period for in-flight requests after the listener stops
    pub drain_timeout: Duration,
    /// Hard ceiling for the whole teardown
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            drain_timeout: Duration::from_millis(2000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
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
        let env = Env(&lookup);
        let defaults = ServerConfig::default();

        let max_payload_size = match env.get("SERVER_MAX_PAYLOAD_SIZE") {
            Some(raw) => parse_byte_size(&raw).map_err(|reason| ConfigError::Invalid {
                name: "SERVER_MAX_PAYLOAD_SIZE",
                value: raw,
                reason,
            })?,
            None => defaults.max_payload_size,
        };

        let server = ServerConfig {
            host: env.get("HOST").unwrap_or(defaults.host),
            port: env.parse("PORT", defaults.port)?,
            heartbeat_interval: env.millis("SERVER_HEARTBEAT_INTERVAL_MS", 5000)?,
            max_payload_size,
            session_buffer: env.parse("SERVER_SESSION_BUFFER", defaults.session_buffer)?,
            auth_token: env.get("AUTH_TOKEN").filter(|t| !t.is_empty()),
        };
        if server.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "SERVER_HEARTBEAT_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if server.session_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "SERVER_SESSION_BUFFER",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let shutdown = ShutdownConfig {
            delay: env.millis("SHUTDOWN_DELAY_MS", 0)?,
            drain_timeout: env.millis("SHUTDOWN_DRAIN_TIMEOUT_MS", 2000)?,
            timeout: env.millis("SHUTDOWN_TIMEOUT_MS", 10_000)?,
        };

        let redis = match env.get("REDIS_URL").filter(|url| !url.is_empty()) {
            Some(url) => Some(redis_config(&env, url)?),
            None => None,
        };

        Ok(Self {
            server,
            shutdown,
            redis,
        })
    }
}

fn redis_config(env: &Env<'_>, url: String) -> Result<RedisEventBusConfig, ConfigError> {
    let defaults = RedisEventBusConfig::default();

    let backoff = ExponentialBackoff {
        factor: env.parse("REDIS_RECONNECT_BACKOFF_FACTOR", 1.0)?,
        initial_timeout: env.millis("REDIS_RECONNECT_BACKOFF_INITIAL_TIMEOUT", 1000)?,
        max_timeout: env
            .limit("REDIS_RECONNECT_BACKOFF_MAX_TIMEOUT")?
            .map(|ms| Duration::from_millis(u64::from(ms))),
        randomize: env.flag("REDIS_RECONNECT_BACKOFF_RANDOMIZE", false)?,
    };
    if let Err(e) = backoff.validate() {
        return Err(ConfigError::Invalid {
            name: "REDIS_RECONNECT_BACKOFF_*",
            value: format!("{backoff:?}"),
            reason: e.to_string(),
        });
    }

    Ok(RedisEventBusConfig {
        url,
        topic: env.get("REDIS_TOPIC").unwrap_or(defaults.topic),
        backoff,
        max_reconnect_attempts: env.limit("REDIS_MAX_RECONNECT_ATTEMPTS")?,
        max_retries_per_request: env.limit("REDIS_MAX_RETRIES_PER_REQUEST")?,
        enable_offline_queue: env.flag("REDIS_ENABLE_OFFLINE_QUEUE", true)?,
        enable_ready_check: env.flag("REDIS_ENABLE_READY_CHECK", true)?,
        ping_interval: env.millis("REDIS_PING_INTERVAL_MS", 5000)?,
        connect_timeout: defaults.connect_timeout,
    })
}

/// Typed access to a variable lookup.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    fn millis(&self, name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default_ms).map(Duration::from_millis)
    }

    /// Unset or `-1` means unlimited.
    fn limit(&self, name: &'static str) -> Result<Option<u32>, ConfigError> {
        match self.parse::<i64>(name, -1)? {
            -1 => Ok(None),
            n => u32::try_from(n).map(Some).map_err(|_| ConfigError::Invalid {
                name,
                value: n.to_string(),
                reason: "expected -1 or a non-negative integer".to_string(),
            }),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                name,
                value: v,
                reason: "expected true/false/1/0".to_string(),
            }),
        }
    }
}

/// Parse a byte size such as `1mb`, `512kb`, `100b` or `2048`.
///
/// Units are binary (`1kb` is 1024 bytes) and case-insensitive; fractional
/// values round down.
///
/// # Errors
///
/// Returns a description of the problem for empty, negative or unknown input.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_byte_size(raw: &str) -> Result<usize, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);

    let multiplier: u64 = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        other => return Err(format!("unknown unit {other:?}")),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("expected a number, got {number:?}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err("size must be a non-negative number".to_string());
    }

    Ok((value * multiplier as f64).floor() as usize)
}

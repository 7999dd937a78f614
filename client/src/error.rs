//! Error types for the relay client.

use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Errors constructing a [`RelayClient`](crate::RelayClient).
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Http(String),
}

/// Errors on the push-channel stream.
///
/// All of these are transient: the client logs them and reconnects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The subscribe request could not be sent
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// The subscribe request did not complete in time
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered the subscribe request with a non-success status
    #[error("Subscribe rejected with status {0}")]
    Status(u16),

    /// Reading the stream failed
    #[error("Stream failed: {0}")]
    Body(String),

    /// The server closed the stream
    #[error("Stream ended")]
    Ended,

    /// An event's data could not be decoded
    #[error("Failed to decode '{event}' event: {reason}")]
    Decode {
        /// SSE event type
        event: String,
        /// Why decoding failed
        reason: String,
    },

    /// An event type the client does not handle
    #[error("Unknown event type '{0}'")]
    UnknownEvent(String),
}

impl StreamError {
    /// Whether the stream is still usable after this error.
    #[must_use]
    pub const fn is_recoverable_in_place(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::UnknownEvent(_))
    }
}

/// Errors forwarding one event to the target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The target URL could not be built from the event
    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    /// The target did not answer in time
    #[error("Forward timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be sent
    #[error("Forward request failed: {0}")]
    Request(String),

    /// The target answered with a non-success status
    #[error("Target responded with status {0}")]
    Status(u16),
}

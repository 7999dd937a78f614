//! Relay payload types.
//!
//! A [`RelayEvent`] is built once at ingress and then travels unchanged through
//! the bus, the push channel and the client. The body is always the verbatim
//! request body as a string, never re-serialized, so a target that verifies a
//! signature over the raw bytes still sees the exact original payload.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "headers": { "content-type": "application/json", "set-cookie": ["a=1", "b=2"] },
//!   "originalUrl": "/webhooks/test/push?a=1",
//!   "path": "/webhooks/test/push",
//!   "query": { "a": "1" },
//!   "body": "{\"test\":true}",
//!   "timestamp": 1735689600000
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A header or query value: a single string, or every value of a repeated name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultiValue {
    /// The name appeared once.
    One(String),
    /// The name appeared more than once, in arrival order.
    Many(Vec<String>),
}

impl MultiValue {
    /// Append another value for the same name.
    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            Self::One(first) => {
                let first = std::mem::take(first);
                *self = Self::Many(vec![first, value]);
            }
            Self::Many(values) => values.push(value),
        }
    }

    /// Iterate over every value in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        };
        slice.iter().map(String::as_str)
    }

    /// The first value.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }
}

impl From<&str> for MultiValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for MultiValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

/// Header map of a relayed request; names are lower-case.
pub type Headers = BTreeMap<String, MultiValue>;

/// Decoded query parameters of a relayed request.
pub type QueryParams = BTreeMap<String, MultiValue>;

/// The normalized representation of one forwarded HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    /// Request headers
    pub headers: Headers,
    /// Path and query exactly as received
    pub original_url: String,
    /// Path without the query string
    pub path: String,
    /// Decoded query parameters
    pub query: QueryParams,
    /// Raw request body
    pub body: String,
    /// Publish time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl RelayEvent {
    /// Start building an event for the given original URL (path plus optional query).
    ///
    /// The path is derived from `original_url` by dropping everything from the
    /// first `?`.
    #[must_use]
    pub fn builder(original_url: impl Into<String>) -> RelayEventBuilder {
        RelayEventBuilder::new(original_url.into())
    }
}

/// Builder for [`RelayEvent`].
#[derive(Debug, Clone)]
pub struct RelayEventBuilder {
    original_url: String,
    headers: Headers,
    query: QueryParams,
    body: String,
    timestamp: i64,
}

impl RelayEventBuilder {
    const fn new(original_url: String) -> Self {
        Self {
            original_url,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: String::new(),
            timestamp: 0,
        }
    }

    /// Add a header value. Repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        append(&mut self.headers, name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter. Repeated names accumulate.
    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        append(&mut self.query, name.into(), value.into());
        self
    }

    /// Set the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the timestamp (milliseconds since epoch).
    #[must_use]
    pub const fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the event.
    #[must_use]
    pub fn build(self) -> RelayEvent {
        let path = self
            .original_url
            .split_once('?')
            .map_or(self.original_url.as_str(), |(path, _)| path)
            .to_string();

        RelayEvent {
            headers: self.headers,
            original_url: self.original_url,
            path,
            query: self.query,
            body: self.body,
            timestamp: self.timestamp,
        }
    }
}

fn append(map: &mut BTreeMap<String, MultiValue>, name: String, value: String) {
    match map.get_mut(&name) {
        Some(existing) => existing.push(value),
        None => {
            map.insert(name, MultiValue::One(value));
        }
    }
}

/// Header carrying the shared subscribe token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Sent once per push-channel session, right after the subscription is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReadyEvent {
    /// How often the server emits heartbeats, in milliseconds
    pub heartbeat_interval: u64,
}

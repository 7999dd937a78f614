//! Forwarding relayed events to the local target.
//!
//! Each event becomes one `POST` to the target base URL joined with the event's
//! path, carrying the original headers (minus hop-by-hop ones) and the raw body.
//! Failures are logged and dropped; nothing is retried.

use crate::error::ForwardError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;
use webhook_relay_core::event::{Headers, RelayEvent};
use webhook_relay_runtime::metrics::{ClientMetrics, ForwardOutcome};

/// Headers that describe the source connection, not the payload.
const STRIPPED_HEADERS: [&str; 5] = [
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

/// Build the target URL for an event.
///
/// `http://localhost:3001/api` + `/webhooks/test?a=1` gives
/// `http://localhost:3001/api/webhooks/test?a=1`. The query is rebuilt from
/// the event's parsed parameters.
///
/// # Errors
///
/// Returns [`ForwardError::InvalidTarget`] if `base` cannot carry a path.
pub fn target_url(base: &Url, event: &RelayEvent) -> Result<Url, ForwardError> {
    if base.cannot_be_a_base() {
        return Err(ForwardError::InvalidTarget(base.to_string()));
    }

    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), event.path);
    url.set_path(if path.is_empty() { "/" } else { &path });
    url.set_fragment(None);
    url.set_query(None);

    if !event.query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, values) in &event.query {
            for value in values.iter() {
                pairs.append_pair(name, value);
            }
        }
    }
    Ok(url)
}

/// Convert event headers for the outbound request.
///
/// Hop-by-hop headers are dropped, as are names or values that are not valid
/// in a request.
#[must_use]
pub fn forward_headers(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        if STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(header = %name, "Skipping invalid header name");
            continue;
        };
        for value in values.iter() {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    map.append(header.clone(), value);
                }
                Err(_) => debug!(header = %name, "Skipping invalid header value"),
            }
        }
    }
    map
}

/// Sends events to the target service.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    target: Url,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder for `target` with a per-request timeout.
    #[must_use]
    pub const fn new(client: Client, target: Url, timeout: Duration) -> Self {
        Self {
            client,
            target,
            timeout,
        }
    }

    /// The target base URL.
    #[must_use]
    pub const fn target(&self) -> &Url {
        &self.target
    }

    /// Forward one event and log the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] if the target is unreachable, too slow, or
    /// answers with a non-success status.
    pub async fn forward(&self, event: &RelayEvent) -> Result<StatusCode, ForwardError> {
        let url = target_url(&self.target, event)?;
        let started = Instant::now();

        let result = self
            .client
            .post(url.clone())
            .headers(forward_headers(&event.headers))
            .body(event.body.clone())
            .timeout(self.timeout)
            .send()
            .await;

        let elapsed = started.elapsed();
        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status();
                info!(
                    method = "POST",
                    url = %url,
                    status = status.as_u16(),
                    elapsed_ms = elapsed.as_millis(),
                    "Forwarded event"
                );
                ClientMetrics::record_forward(ForwardOutcome::Success, elapsed);
                Ok(status)
            }
            Ok(response) => {
                let status = response.status().as_u16();
                warn!(method = "POST", url = %url, status, "Target rejected event");
                ClientMetrics::record_forward(ForwardOutcome::Rejected, elapsed);
                Err(ForwardError::Status(status))
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    ForwardError::Timeout(self.timeout)
                } else {
                    ForwardError::Request(e.to_string())
                };
                error!(method = "POST", url = %url, error = %error, "Forward failed");
                ClientMetrics::record_forward(ForwardOutcome::Failed, elapsed);
                Err(error)
            }
        }
    }
}

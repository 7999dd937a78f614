//! Webhook ingress.
//!
//! Any `POST` under `/webhooks/:channel` becomes a [`RelayEvent`] published on
//! `channel`. The body is never parsed; whatever the producer sent travels as
//! a string, so JSON, form-encoded and plain-text webhooks all relay the same
//! way.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode},
};
use std::collections::HashMap;
use std::time::Instant;
use webhook_relay_core::event::RelayEvent;
use webhook_relay_runtime::metrics::PublishMetrics;

/// Publish one inbound webhook.
///
/// Responds 200 once the bus accepted the event, whether or not anyone is
/// subscribed to the channel.
///
/// # Endpoint
///
/// ```text
/// POST /webhooks/:channel
/// POST /webhooks/:channel/*path
/// ```
///
/// # Errors
///
/// - 413 when the body exceeds the configured limit
/// - 400 when the body cannot be read
/// - 500 when the event bus rejects the publish
pub async fn publish(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<StatusCode, AppError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::payload_too_large(state.max_payload_size)
        } else {
            AppError::bad_request(rejection.body_text())
        }
    })?;
    let channel = params
        .get("channel")
        .ok_or_else(|| AppError::bad_request("Missing channel"))?;

    let original_url = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
    let event = build_event(original_url, &headers, &body, state.clock.now_millis());

    let started = Instant::now();
    match state.bus.publish(channel, &event).await {
        Ok(()) => {
            PublishMetrics::record_published(started.elapsed());
            tracing::debug!(
                channel = %channel,
                path = %event.path,
                bytes = body.len(),
                subscribers = state.bus.subscribers_count(channel),
                "Published webhook"
            );
            Ok(StatusCode::OK)
        }
        Err(e) => {
            PublishMetrics::record_failure();
            Err(AppError::from(e))
        }
    }
}

/// Normalize a request into a [`RelayEvent`].
///
/// Header values that are not valid UTF-8, and body bytes likewise, are
/// converted lossily.
#[must_use]
pub fn build_event(
    original_url: String,
    headers: &HeaderMap,
    body: &[u8],
    timestamp: i64,
) -> RelayEvent {
    let query = original_url
        .split_once('?')
        .map(|(_, query)| query.to_string())
        .unwrap_or_default();

    let mut builder = RelayEvent::builder(original_url);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        builder = builder.query_param(name, value);
    }

    builder
        .body(String::from_utf8_lossy(body))
        .timestamp(timestamp)
        .build()
}

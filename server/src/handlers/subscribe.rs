//! Push-channel sessions over Server-Sent Events.
//!
//! # Session Lifecycle
//!
//! ```text
//! Client                     Session                       EventBus
//!   │                           │                              │
//!   ├─ GET /subscribe/test ────>│                              │
//!   │                           ├─ subscribe("test") ─────────>│
//!   │<── id:0 event:ready ──────┤                              │
//!   │<── id:1 event:heartbeat ──┤   (every heartbeat period)   │
//!   │                           │<── listener(event) ──────────┤
//!   │<── id:2 data:{RelayEvent} ┤                              │
//!   │                           │                              │
//!   ├─ disconnect ─────────────>│                              │
//!   │                           ├─ unsubscribe(id) ───────────>│
//! ```
//!
//! The bus listener only serializes the event and hands it to the session's
//! bounded queue; it never blocks the publisher. A session that cannot keep up
//! loses events instead of stalling the bus.
//!
//! The subscription is owned by a guard inside the response stream. However
//! the stream ends (client close, broken connection, server shutdown), the
//! guard drops with it and unsubscribes exactly once.

use crate::state::AppState;
use async_stream::stream;
use axum::{
    extract::{Path, State},
    http::{HeaderName, header},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use webhook_relay_core::event::{ConnectionReadyEvent, RelayEvent};
use webhook_relay_core::event_bus::{EventBus, Listener, SubscriptionId};
use webhook_relay_runtime::metrics::SessionMetrics;
use webhook_relay_runtime::timers::heartbeat_interval;

/// Open a push-channel session on `channel`.
///
/// # Endpoint
///
/// ```text
/// GET /subscribe/:channel
/// x-auth-token: <token>   (when the server has one configured)
/// ```
///
/// # Stream
///
/// ```text
/// id: 0
/// event: ready
/// data: {"heartbeatInterval":5000}
///
/// id: 1
/// event: heartbeat
/// data: {}
///
/// id: 2
/// data: {"headers":{..},"originalUrl":"/webhooks/test","path":"/webhooks/test","query":{},"body":"..","timestamp":..}
/// ```
pub async fn subscribe(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel(state.session_buffer);
    let id = state.bus.subscribe(&channel, session_listener(channel.clone(), tx));
    SessionMetrics::record_opened();
    tracing::info!(
        channel = %channel,
        subscribers = state.bus.subscribers_count(&channel),
        "Session opened"
    );

    let guard = SessionGuard {
        bus: Arc::clone(&state.bus),
        channel,
        id,
    };
    let stream = session_stream(guard, rx, state.heartbeat_interval, state.shutdown.clone());

    (
        [
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
}

/// Listener feeding one session's queue.
fn session_listener(channel: String, tx: mpsc::Sender<String>) -> Listener {
    Arc::new(move |event: &RelayEvent| {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Failed to serialize event");
                return;
            }
        };
        match tx.try_send(json) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                SessionMetrics::record_dropped();
                tracing::warn!(channel = %channel, "Session buffer full, dropping event");
            }
            // The session is ending; its guard is about to unsubscribe.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    })
}

/// Unsubscribes when the session's stream is dropped.
struct SessionGuard {
    bus: Arc<dyn EventBus>,
    channel: String,
    id: SubscriptionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.channel, self.id);
        SessionMetrics::record_closed();
        tracing::info!(
            channel = %self.channel,
            subscribers = self.bus.subscribers_count(&self.channel),
            "Session closed"
        );
    }
}

enum Frame {
    Heartbeat,
    Message(String),
}

fn session_stream(
    guard: SessionGuard,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream! {
        let session = guard;
        let mut next_id: u64 = 0;

        let ready = ConnectionReadyEvent {
            heartbeat_interval: u64::try_from(heartbeat.as_millis()).unwrap_or(u64::MAX),
        };
        match Event::default().id(next_id.to_string()).event("ready").json_data(ready) {
            Ok(event) => yield Ok(event),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode ready event");
                return;
            }
        }

        let mut ticker = heartbeat_interval(heartbeat);
        loop {
            let frame = tokio::select! {
                _ = ticker.tick() => Frame::Heartbeat,
                message = rx.recv() => match message {
                    Some(json) => Frame::Message(json),
                    None => break,
                },
                () = wait_for_shutdown(&mut shutdown) => {
                    tracing::debug!(channel = %session.channel, "Ending session for shutdown");
                    break;
                }
            };

            next_id += 1;
            let event = Event::default().id(next_id.to_string());
            yield Ok(match frame {
                Frame::Heartbeat => event.event("heartbeat").data("{}"),
                Frame::Message(json) => {
                    SessionMetrics::record_streamed();
                    event.data(json)
                }
            });
        }
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let signalled = rx.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use webhook_relay_core::local::LocalEventBus;
    use webhook_relay_testing::fixtures;

    fn guard(bus: &Arc<LocalEventBus>, channel: &str, tx: mpsc::Sender<String>) -> SessionGuard {
        let id = bus.subscribe(channel, session_listener(channel.to_string(), tx));
        SessionGuard {
            bus: Arc::clone(bus) as Arc<dyn EventBus>,
            channel: channel.to_string(),
            id,
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes_once() {
        let bus = Arc::new(LocalEventBus::new());
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);
        let stream = session_stream(guard(&bus, "test", tx), rx, Duration::from_secs(5), shutdown);
        assert_eq!(bus.subscribers_count("test"), 1);

        drop(stream);
        assert_eq!(bus.subscribers_count("test"), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let bus = Arc::new(LocalEventBus::new());
        let (tx, mut rx) = mpsc::channel(1);
        let _guard = guard(&bus, "test", tx);

        bus.publish("test", &fixtures::github_push()).await.unwrap();
        bus.publish("test", &fixtures::github_push()).await.unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let bus = Arc::new(LocalEventBus::new());
        let (tx, rx) = mpsc::channel(8);
        let (stop, shutdown) = watch::channel(false);
        let mut stream = Box::pin(session_stream(
            guard(&bus, "test", tx),
            rx,
            Duration::from_secs(60),
            shutdown,
        ));

        assert!(stream.next().await.is_some());
        stop.send(true).unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(bus.subscribers_count("test"), 0);
    }
}

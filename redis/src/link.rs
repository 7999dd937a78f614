//! Connection supervision for the publisher and subscriber links.
//!
//! Each link runs in its own task: connect, report ready, serve until the
//! connection is lost, then wait out a backoff delay and try again. The attempt
//! counter resets after every successful connect. Once a link's counter reaches
//! the configured ceiling the link is marked exhausted, the bus fires its
//! not-ready callback and the task ends.

use crate::config::RedisEventBusConfig;
use futures::{FutureExt, StreamExt};
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use webhook_relay_core::event::RelayEvent;
use webhook_relay_core::event_bus::{EventBusError, ListenerRegistry, ReadinessNotifier};
use webhook_relay_runtime::metrics::EventBusMetrics;

/// State of one backing-store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// Connected and usable
    Ready,
    /// Waiting before reconnection attempt `attempt` (zero-based)
    Reconnecting {
        /// Zero-based attempt number
        attempt: u32,
    },
    /// Ceiling reached; no further attempts
    Exhausted,
    /// Closed by the owner
    Closed,
}

/// Which of the two connections a task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Publisher,
    Subscriber,
}

impl Link {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

/// How a connection session ended.
#[derive(Debug)]
pub(crate) enum LinkExit {
    /// Could not connect
    Failed(String),
    /// Was ready, then lost the connection
    Lost(String),
    /// Shutdown requested
    Shutdown,
}

/// Envelope on the shared topic.
#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    channel: &'a str,
    event: &'a RelayEvent,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    channel: String,
    event: RelayEvent,
}

/// Wrap a channel and event for the shared topic.
pub(crate) fn encode_envelope(channel: &str, event: &RelayEvent) -> Result<String, EventBusError> {
    serde_json::to_string(&OutboundEnvelope { channel, event })
        .map_err(|e| EventBusError::Serialization(e.to_string()))
}

/// Decode a message from the shared topic and deliver it to local listeners only.
///
/// Returns the channel and the number of listeners invoked.
pub(crate) fn deliver_locally(
    registry: &ListenerRegistry,
    payload: &str,
) -> Result<(String, usize), EventBusError> {
    let envelope: InboundEnvelope =
        serde_json::from_str(payload).map_err(|e| EventBusError::Serialization(e.to_string()))?;
    let delivered = registry.dispatch(&envelope.channel, &envelope.event);
    Ok((envelope.channel, delivered))
}

/// State shared between the bus handle and its link tasks.
pub(crate) struct Shared {
    pub(crate) publisher: Mutex<Option<MultiplexedConnection>>,
    pub(crate) publisher_state: watch::Sender<LinkState>,
    pub(crate) subscriber_state: watch::Sender<LinkState>,
    pub(crate) publisher_lost: Notify,
    pub(crate) notifier: ReadinessNotifier,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            publisher: Mutex::new(None),
            publisher_state: watch::Sender::new(LinkState::Disconnected),
            subscriber_state: watch::Sender::new(LinkState::Disconnected),
            publisher_lost: Notify::new(),
            notifier: ReadinessNotifier::new(),
            shutdown: watch::Sender::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn state(&self, link: Link) -> &watch::Sender<LinkState> {
        match link {
            Link::Publisher => &self.publisher_state,
            Link::Subscriber => &self.subscriber_state,
        }
    }

    pub(crate) fn set_state(&self, link: Link, state: LinkState) {
        self.state(link).send_replace(state);
    }

    pub(crate) fn both_ready(&self) -> bool {
        *self.publisher_state.borrow() == LinkState::Ready
            && *self.subscriber_state.borrow() == LinkState::Ready
    }

    pub(crate) fn publisher_connection(&self) -> Option<MultiplexedConnection> {
        self.publisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_publisher(&self, connection: Option<MultiplexedConnection>) {
        *self.publisher.lock().unwrap_or_else(PoisonError::into_inner) = connection;
    }

    /// A publish hit a broken connection. The permit is kept until the
    /// publisher session checks for it, even if it is mid-ping.
    pub(crate) fn report_publisher_lost(&self) {
        self.publisher_lost.notify_one();
    }

    /// Drop a loss report left over from an earlier connection.
    fn clear_publisher_lost(&self) {
        let _ = self.publisher_lost.notified().now_or_never();
    }

    /// Mark a link ready and fire the bus ready callback once both are.
    fn link_ready(&self, link: Link) {
        self.set_state(link, LinkState::Ready);
        tracing::info!(link = link.name(), "Event bus link ready");
        if self.both_ready() {
            tracing::info!("Event bus ready");
            self.notifier.ready();
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Run one link until shutdown or exhaustion.
pub(crate) async fn supervise<F, Fut>(
    link: Link,
    shared: Arc<Shared>,
    config: RedisEventBusConfig,
    mut session: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = LinkExit>,
{
    let mut shutdown = shared.shutdown.subscribe();
    let mut attempt: u32 = 0;
    shared.set_state(link, LinkState::Connecting);

    loop {
        let exit = tokio::select! {
            exit = session() => exit,
            () = wait_for_shutdown(&mut shutdown) => LinkExit::Shutdown,
        };

        match exit {
            LinkExit::Shutdown => return,
            LinkExit::Lost(reason) => {
                attempt = 0;
                tracing::warn!(link = link.name(), reason = %reason, "Event bus connection lost");
            }
            LinkExit::Failed(reason) => {
                tracing::warn!(
                    link = link.name(),
                    attempt,
                    reason = %reason,
                    "Event bus connection failed"
                );
            }
        }

        if shared.is_shutting_down() {
            return;
        }

        if config.max_reconnect_attempts.is_some_and(|max| attempt >= max) {
            shared.set_state(link, LinkState::Exhausted);
            tracing::error!(
                link = link.name(),
                attempts = attempt,
                "Reconnect attempts exhausted, giving up"
            );
            shared.notifier.not_ready();
            return;
        }

        let delay = config.backoff.delay_for_attempt(attempt);
        shared.set_state(link, LinkState::Reconnecting { attempt });
        EventBusMetrics::record_reconnect(link.name());
        tracing::info!(
            link = link.name(),
            attempt,
            delay_ms = delay.as_millis(),
            "Scheduling event bus reconnect"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = wait_for_shutdown(&mut shutdown) => return,
        }
        attempt = attempt.saturating_add(1);
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn ping(connection: &mut MultiplexedConnection) -> redis::RedisResult<String> {
    redis::cmd("PING").query_async(connection).await
}

async fn persistence_info(connection: &mut MultiplexedConnection) -> redis::RedisResult<String> {
    redis::cmd("INFO").arg("persistence").query_async(connection).await
}

/// One publisher connection: connect, optional loading check, then probe until lost.
pub(crate) async fn publisher_session(
    client: redis::Client,
    shared: Arc<Shared>,
    config: RedisEventBusConfig,
) -> LinkExit {
    let connect = tokio::time::timeout(
        config.connect_timeout,
        client.get_multiplexed_async_connection(),
    )
    .await;
    let mut connection = match connect {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => return LinkExit::Failed(e.to_string()),
        Err(_) => return LinkExit::Failed("connect timed out".to_string()),
    };

    if config.enable_ready_check {
        if let Err(reason) = wait_until_loaded(&mut connection, config.connect_timeout).await {
            return LinkExit::Failed(reason);
        }
    }

    shared.clear_publisher_lost();
    shared.set_publisher(Some(connection.clone()));
    shared.link_ready(Link::Publisher);

    let mut probe = tokio::time::interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    let exit = loop {
        tokio::select! {
            _ = probe.tick() => {
                match tokio::time::timeout(config.connect_timeout, ping(&mut connection)).await {
                    Ok(Ok(_)) => tracing::trace!("Publisher ping ok"),
                    Ok(Err(e)) => break LinkExit::Lost(e.to_string()),
                    Err(_) => break LinkExit::Lost("ping timed out".to_string()),
                }
            }
            () = shared.publisher_lost.notified() => {
                break LinkExit::Lost("publish hit a broken connection".to_string());
            }
        }
    };

    shared.set_publisher(None);
    shared.set_state(Link::Publisher, LinkState::Disconnected);
    exit
}

/// One subscriber connection: subscribe to the shared topic and deliver until lost.
pub(crate) async fn subscriber_session(
    client: redis::Client,
    shared: Arc<Shared>,
    registry: Arc<ListenerRegistry>,
    config: RedisEventBusConfig,
) -> LinkExit {
    let connect = tokio::time::timeout(config.connect_timeout, client.get_async_pubsub()).await;
    let mut pubsub = match connect {
        Ok(Ok(pubsub)) => pubsub,
        Ok(Err(e)) => return LinkExit::Failed(e.to_string()),
        Err(_) => return LinkExit::Failed("connect timed out".to_string()),
    };
    if let Err(e) = pubsub.subscribe(&config.topic).await {
        return LinkExit::Failed(e.to_string());
    }

    shared.link_ready(Link::Subscriber);

    let mut messages = std::pin::pin!(pubsub.on_message());
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding non-text message from shared topic");
                continue;
            }
        };
        match deliver_locally(&registry, &payload) {
            Ok((channel, delivered)) => {
                tracing::debug!(channel = %channel, delivered, "Delivered replicated event");
            }
            Err(e) => tracing::warn!(error = %e, "Discarding malformed envelope"),
        }
    }

    shared.set_state(Link::Subscriber, LinkState::Disconnected);
    LinkExit::Lost("subscription stream ended".to_string())
}

/// Block until `INFO persistence` no longer reports `loading:1`.
async fn wait_until_loaded(
    connection: &mut MultiplexedConnection,
    timeout: Duration,
) -> Result<(), String> {
    loop {
        let info = tokio::time::timeout(timeout, persistence_info(connection))
            .await
            .map_err(|_| "ready check timed out".to_string())?
            .map_err(|e| e.to_string())?;

        match loading_delay(&info) {
            None => return Ok(()),
            Some(delay) => {
                tracing::info!(delay_ms = delay.as_millis(), "Backing store still loading");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Delay before re-checking, or `None` when the dataset is loaded.
fn loading_delay(info: &str) -> Option<Duration> {
    let field = |name: &str| {
        info.lines()
            .find_map(|line| line.trim().strip_prefix(name)?.strip_prefix(':'))
    };

    if field("loading") != Some("1") {
        return None;
    }
    let eta_ms = field("loading_eta_seconds")
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(1000, |secs| secs.saturating_mul(1000));
    Some(Duration::from_millis(eta_ms.clamp(1, 1000)))
}

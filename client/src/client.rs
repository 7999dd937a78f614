//! The relay client connection loop.
//!
//! # State Machine
//!
//! ```text
//!        start()
//! Idle ──────────▶ Connecting ──ready──▶ Subscribed
//!  ▲                  ▲                     │
//!  │ close()          │ reconnect_interval  │ stream error / end
//!  │                  └──── Reconnecting ◀──┘
//!  │
//!  └── recover() = close() + start(), fired by the watchdog
//! ```
//!
//! One spawned task owns the stream and the [`Watchdog`]. `ready` arms the
//! watchdog with `heartbeatInterval + watchdog_grace`, `heartbeat` resets it,
//! and messages never touch it. Stream failures stop the watchdog and
//! reconnect in place; a watchdog expiry means the connection died silently
//! and triggers a full [`RelayClient::recover`].
//!
//! Messages are forwarded on their own tasks so a slow target never blocks
//! reading the stream.

use crate::config::ClientConfig;
use crate::error::{ClientError, StreamError};
use crate::forward::Forwarder;
use crate::sse::{ServerEvent, server_events};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webhook_relay_core::event::{AUTH_TOKEN_HEADER, RelayEvent};
use webhook_relay_runtime::metrics::ClientMetrics;
use webhook_relay_runtime::timers::Watchdog;

/// Where the connection loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or closed
    Idle,
    /// Opening the stream
    Connecting,
    /// `ready` received, watchdog armed
    Subscribed,
    /// Waiting to reopen a failed stream
    Reconnecting,
}

/// Lifetime counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Successful `start` calls
    pub starts: u64,
    /// `close` calls that stopped a running connection
    pub closes: u64,
    /// Watchdog or external recoveries
    pub recoveries: u64,
    /// Events the target accepted
    pub forwarded: u64,
    /// Events that could not be delivered
    pub failed: u64,
    /// In-place stream reconnects
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    starts: AtomicU64,
    closes: AtomicU64,
    recoveries: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
    reconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            starts: self.starts.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the handle and the connection task.
#[derive(Debug)]
struct Shared {
    config: ClientConfig,
    http: reqwest::Client,
    forwarder: Forwarder,
    counters: Counters,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every close; a task only reports state for its own generation.
    generation: AtomicU64,
}

impl Shared {
    /// Apply `state` unless the task reporting it has since been closed.
    ///
    /// The check runs under the watch lock, so a stale task can never
    /// overwrite the `Idle` that `close` stores after bumping the generation.
    fn set_state(&self, generation: u64, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let live = self.generation.load(Ordering::SeqCst) == generation;
            if live {
                *current = state;
            }
            live
        });
    }

    fn retire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Idle);
    }

    async fn connect(&self) -> Result<reqwest::Response, StreamError> {
        let mut request = self
            .http
            .get(self.config.source_url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.config.auth_token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }

        let timeout = self.config.connect_timeout;
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| StreamError::Timeout(timeout))?
            .map_err(|e| StreamError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }
        Ok(response)
    }

    fn dispatch(self: &Arc<Self>, event: RelayEvent) {
        debug!(path = %event.path, "Received event");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let counter = match shared.forwarder.forward(&event).await {
                Ok(_) => &shared.counters.forwarded,
                Err(_) => &shared.counters.failed,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
}

#[derive(Debug)]
struct Inner {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Relay client already running");
            return;
        }

        self.shared.counters.starts.fetch_add(1, Ordering::Relaxed);
        info!(source = %self.shared.config.source_url, "Starting relay client");
        let generation = self.shared.generation.load(Ordering::SeqCst);
        *task = Some(tokio::spawn(run(
            Arc::clone(&self.shared),
            Arc::downgrade(self),
            generation,
        )));
    }

    fn close(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            self.shared.counters.closes.fetch_add(1, Ordering::Relaxed);
            self.shared.retire();
            info!(source = %self.shared.config.source_url, "Relay client closed");
        }
    }

    fn recover(self: &Arc<Self>) {
        self.shared.counters.recoveries.fetch_add(1, Ordering::Relaxed);
        ClientMetrics::record_recovery();
        self.close();
        self.start();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Consumes a relay push channel and forwards every event to the target.
///
/// Cloning yields another handle to the same connection.
///
/// # Example
///
/// ```no_run
/// use webhook_relay_client::{ClientConfig, RelayClient};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = ClientConfig::new(
///     "http://relay.example.com/subscribe/github",
///     "http://localhost:8080",
/// )?;
/// let client = RelayClient::new(config)?;
/// client.start();
/// // ...
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    /// Create an idle client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;
        let forwarder = Forwarder::new(
            http.clone(),
            config.target_base_url.clone(),
            config.forward_timeout,
        );
        let (state, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    config,
                    http,
                    forwarder,
                    counters: Counters::default(),
                    state,
                    generation: AtomicU64::new(0),
                }),
                task: Mutex::new(None),
            }),
        })
    }

    /// Open the stream. Does nothing if already running.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Stop the watchdog and drop the stream. Idempotent.
    ///
    /// Forwards already in flight run to completion.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Tear down and reopen the stream.
    pub fn recover(&self) {
        warn!(source = %self.inner.shared.config.source_url, "Recovering relay connection");
        self.inner.recover();
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        self.inner.shared.counters.snapshot()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }
}

async fn run(shared: Arc<Shared>, owner: Weak<Inner>, generation: u64) {
    let source = shared.config.source_url.clone();
    let mut watchdog = Watchdog::new();

    loop {
        shared.set_state(generation, ConnectionState::Connecting);
        let lost = match shared.connect().await {
            Ok(response) => {
                info!(source = %source, "Connected to relay");
                let events = server_events(response);
                tokio::pin!(events);

                loop {
                    tokio::select! {
                        () = watchdog.expired() => {
                            warn!(
                                source = %source,
                                timeout_ms = watchdog.timeout().unwrap_or_default().as_millis(),
                                "No heartbeat within watchdog timeout"
                            );
                            if let Some(inner) = owner.upgrade() {
                                inner.recover();
                            }
                            return;
                        }
                        next = events.next() => match next {
                            Some(Ok(ServerEvent::Ready(ready))) => {
                                let interval = Duration::from_millis(ready.heartbeat_interval);
                                watchdog.arm(interval + shared.config.watchdog_grace);
                                shared.set_state(generation, ConnectionState::Subscribed);
                                info!(
                                    source = %source,
                                    heartbeat_ms = ready.heartbeat_interval,
                                    "Subscribed"
                                );
                            }
                            Some(Ok(ServerEvent::Heartbeat)) => {
                                trace!("Heartbeat");
                                watchdog.reset();
                            }
                            Some(Ok(ServerEvent::Message(event))) => shared.dispatch(*event),
                            Some(Err(e)) if e.is_recoverable_in_place() => {
                                warn!(error = %e, "Skipping undecodable event");
                            }
                            Some(Err(e)) => break e,
                            None => break StreamError::Ended,
                        }
                    }
                }
            }
            Err(e) => e,
        };

        watchdog.stop();
        shared.set_state(generation, ConnectionState::Reconnecting);
        shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        warn!(
            source = %source,
            error = %lost,
            retry_ms = shared.config.reconnect_interval.as_millis(),
            "Stream lost, reconnecting"
        );
        tokio::time::sleep(shared.config.reconnect_interval).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unreachable_config() -> ClientConfig {
        let mut config =
            ClientConfig::new("http://127.0.0.1:9/subscribe/test", "http://127.0.0.1:9").unwrap();
        config.reconnect_interval = Duration::from_millis(20);
        config.watchdog_grace = Duration::from_millis(200);
        config.connect_timeout = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn test_new_client_is_idle() {
        let client = RelayClient::new(unreachable_config()).unwrap();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert_eq!(client.stats(), ClientStats::default());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = unreachable_config();
        config.reconnect_interval = config.watchdog_grace;
        assert!(matches!(
            RelayClient::new(config),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_close_counts_once() {
        let client = RelayClient::new(unreachable_config()).unwrap();
        client.start();
        client.start();
        client.close();
        client.close();

        let stats = client.stats();
        assert_eq!(stats.starts, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_source_keeps_reconnecting() {
        let client = RelayClient::new(unreachable_config()).unwrap();
        client.start();

        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();

        client.close();
        assert!(client.stats().reconnects >= 1);
        assert_eq!(client.stats().recoveries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_client_stays_idle() {
        let client = RelayClient::new(unreachable_config()).unwrap();

        for _ in 0..20 {
            client.start();
            tokio::task::yield_now().await;
            client.close();

            // A task still finishing on another worker must not move the state.
            let state = client.watch_state();
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(client.state(), ConnectionState::Idle);
            assert!(!state.has_changed().unwrap());
        }
        assert_eq!(client.stats().closes, 20);
    }

    #[tokio::test]
    async fn test_recover_cycles_the_connection() {
        let client = RelayClient::new(unreachable_config()).unwrap();
        client.start();
        client.recover();

        let stats = client.stats();
        assert_eq!((stats.starts, stats.closes, stats.recoveries), (2, 1, 1));
        client.close();
    }
}

//! Redis-backed replicated event bus for the webhook relay.
//!
//! Every relay instance publishes to and subscribes on one shared topic. The
//! logical channel travels inside the envelope, so channel separation happens
//! only in the in-process fan-out after receipt:
//!
//! ```text
//!  instance A                     Redis                      instance B
//! ┌──────────┐  PUBLISH global  ┌────────┐  message global  ┌──────────┐
//! │ publish  │─────────────────▶│ global │─────────────────▶│ registry │──▶ sessions
//! └──────────┘                  └────────┘                  └──────────┘
//!                                    │
//!                                    └──────▶ instance A registry ──▶ sessions
//! ```
//!
//! Local delivery happens through the same subscription, so an instance hears
//! its own publishes exactly once and received messages are never re-published.
//!
//! # Connections
//!
//! Two connections are held: a multiplexed connection used only for `PUBLISH`
//! and `PING`, and a dedicated pub/sub connection. The bus is ready only while
//! both are. Lost connections are re-established with
//! [`ExponentialBackoff`](webhook_relay_runtime::backoff::ExponentialBackoff);
//! once a connection exhausts `max_reconnect_attempts` the not-ready callback
//! fires and that connection stays down.
//!
//! # Example
//!
//! ```no_run
//! use webhook_relay_core::event::RelayEvent;
//! use webhook_relay_core::event_bus::{EventBus, ReadinessCallbacks};
//! use webhook_relay_redis::RedisEventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedisEventBus::builder()
//!     .url("redis://127.0.0.1:6379")
//!     .max_reconnect_attempts(Some(10))
//!     .build()?;
//!
//! bus.start(ReadinessCallbacks::new(
//!     |first| println!("ready (first: {first})"),
//!     || println!("gave up reconnecting"),
//! ))
//! .await?;
//!
//! bus.publish("orders", &RelayEvent::builder("/webhooks/orders").build()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod link;

pub use config::{DEFAULT_TOPIC, RedisEventBusBuilder, RedisEventBusConfig};
pub use link::LinkState;

use link::{Link, Shared, encode_envelope, publisher_session, subscriber_session, supervise};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use webhook_relay_core::event::RelayEvent;
use webhook_relay_core::event_bus::{
    BusFuture, EventBus, EventBusError, Listener, ListenerRegistry, ReadinessCallbacks,
    SubscriptionId,
};

/// Replicated [`EventBus`] backed by Redis pub/sub.
pub struct RedisEventBus {
    config: RedisEventBusConfig,
    client: redis::Client,
    registry: Arc<ListenerRegistry>,
    shared: Arc<Shared>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl RedisEventBus {
    /// Create a bus from a configuration. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::InvalidConfiguration`] if the URL cannot be parsed
    /// or the settings are invalid.
    pub fn new(config: RedisEventBusConfig) -> Result<Self, EventBusError> {
        config.validate()?;
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            EventBusError::InvalidConfiguration(format!("invalid Redis URL: {e}"))
        })?;

        tracing::info!(
            topic = %config.topic,
            max_reconnect_attempts = ?config.max_reconnect_attempts,
            offline_queue = config.enable_offline_queue,
            ready_check = config.enable_ready_check,
            "RedisEventBus created"
        );

        Ok(Self {
            config,
            client,
            registry: Arc::new(ListenerRegistry::new()),
            shared: Arc::new(Shared::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a builder with default settings.
    #[must_use]
    pub fn builder() -> RedisEventBusBuilder {
        RedisEventBusBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RedisEventBusConfig {
        &self.config
    }

    /// Current state of the publisher connection.
    #[must_use]
    pub fn publisher_state(&self) -> LinkState {
        *self.shared.publisher_state.borrow()
    }

    /// Current state of the subscriber connection.
    #[must_use]
    pub fn subscriber_state(&self) -> LinkState {
        *self.shared.subscriber_state.borrow()
    }

    fn spawn_links(&self) {
        let publisher = {
            let shared = Arc::clone(&self.shared);
            let client = self.client.clone();
            let config = self.config.clone();
            tokio::spawn(supervise(
                Link::Publisher,
                Arc::clone(&shared),
                config.clone(),
                move || publisher_session(client.clone(), Arc::clone(&shared), config.clone()),
            ))
        };

        let subscriber = {
            let shared = Arc::clone(&self.shared);
            let registry = Arc::clone(&self.registry);
            let client = self.client.clone();
            let config = self.config.clone();
            tokio::spawn(supervise(
                Link::Subscriber,
                Arc::clone(&shared),
                config.clone(),
                move || {
                    subscriber_session(
                        client.clone(),
                        Arc::clone(&shared),
                        Arc::clone(&registry),
                        config.clone(),
                    )
                },
            ))
        };

        self.shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([publisher, subscriber]);
    }

    /// Wait for a usable publisher connection, honouring the offline queue settings.
    async fn publisher_for(&self, channel: &str) -> Result<MultiplexedConnection, EventBusError> {
        let mut state = self.shared.publisher_state.subscribe();
        let mut reconnects_seen: u32 = 0;

        loop {
            if let Some(connection) = self.shared.publisher_connection() {
                return Ok(connection);
            }

            match *state.borrow_and_update() {
                LinkState::Closed => return Err(EventBusError::Closed),
                LinkState::Exhausted => {
                    return Err(EventBusError::ConnectionFailed(
                        "reconnect attempts exhausted".to_string(),
                    ));
                }
                _ => {}
            }

            if !self.config.enable_offline_queue {
                return Err(EventBusError::Offline {
                    channel: channel.to_string(),
                });
            }

            tracing::debug!(channel = %channel, "Publisher offline, queueing publish");
            if state.changed().await.is_err() {
                return Err(EventBusError::Closed);
            }

            if matches!(*state.borrow(), LinkState::Reconnecting { .. }) {
                reconnects_seen = reconnects_seen.saturating_add(1);
                if self
                    .config
                    .max_retries_per_request
                    .is_some_and(|max| reconnects_seen > max)
                {
                    return Err(EventBusError::RetriesExhausted {
                        channel: channel.to_string(),
                        attempts: reconnects_seen,
                    });
                }
            }
        }
    }
}

impl EventBus for RedisEventBus {
    fn start(&self, callbacks: ReadinessCallbacks) -> BusFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(EventBusError::Closed);
            }
            self.shared.notifier.install(callbacks);

            if self.started.swap(true, Ordering::SeqCst) {
                tracing::debug!("RedisEventBus already started, callbacks replaced");
                return Ok(());
            }

            tracing::info!(topic = %self.config.topic, "Starting RedisEventBus");
            self.spawn_links();
            Ok(())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.shutdown.send_replace(true);

        for task in self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }

        self.shared.set_publisher(None);
        self.shared.publisher_state.send_replace(LinkState::Closed);
        self.shared.subscriber_state.send_replace(LinkState::Closed);

        if self.started.swap(false, Ordering::SeqCst) {
            tracing::info!("RedisEventBus closed");
        }
    }

    fn subscribe(&self, channel: &str, listener: Listener) -> SubscriptionId {
        self.registry.subscribe(channel, listener)
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(channel, id)
    }

    fn subscribers_count(&self, channel: &str) -> usize {
        self.registry.count(channel)
    }

    fn publish(&self, channel: &str, event: &RelayEvent) -> BusFuture<'_, ()> {
        let channel = channel.to_string();
        let payload = encode_envelope(&channel, event);

        Box::pin(async move {
            let payload = payload?;
            let mut connection = self.publisher_for(&channel).await?;

            let result: redis::RedisResult<i64> =
                connection.publish(&self.config.topic, payload).await;

            match result {
                Ok(receivers) => {
                    tracing::debug!(
                        channel = %channel,
                        topic = %self.config.topic,
                        receivers,
                        "Event published to shared topic"
                    );
                    Ok(())
                }
                Err(e) => {
                    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                        self.shared.report_publisher_lost();
                    }
                    tracing::error!(channel = %channel, error = %e, "Failed to publish event");
                    Err(EventBusError::PublishFailed {
                        channel,
                        reason: e.to_string(),
                    })
                }
            }
        })
    }

    fn is_ready(&self) -> bool {
        self.shared.both_ready()
    }
}

impl Drop for RedisEventBus {
    fn drop(&mut self) {
        for task in self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

//! Event bus abstraction for relaying events to push-channel sessions.
//!
//! This module provides the [`EventBus`] trait. Every connected session registers a
//! listener under its channel name; the ingress endpoint publishes to the channel
//! and the bus invokes every listener of that channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Ingress    │
//! └──────┬───────┘
//!        │ publish(channel, event)
//!        ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │     EventBus     │◄────►│  Backing store   │◄─── other server instances
//! │ (local / redis)  │      │ (replicated only)│
//! └──────┬───────────┘      └──────────────────┘
//!        │ listener(event)
//!   ┌────┴────┐
//!   ▼         ▼
//! ┌───────┐ ┌───────┐
//! │Session│ │Session│
//! └───────┘ └───────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-most-once**: no replay log, an event published while nobody listens is gone
//! - **Synchronous fan-out**: listeners of one publish run in registration order
//! - **Channel isolation**: a listener only ever sees events of its own channel
//! - **Errors surface to the publisher**: the bus never retries a failed publish
//!
//! # Implementations
//!
//! - [`LocalEventBus`](crate::local::LocalEventBus) - in-process, always ready
//! - `RedisEventBus` (`webhook-relay-redis`) - replicated across instances
//!
//! # Dyn Compatibility
//!
//! Async operations return `Pin<Box<dyn Future>>` so the bus can be shared as
//! `Arc<dyn EventBus>` between handlers.

use crate::event::RelayEvent;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// The bus configuration is unusable
    #[error("Invalid event bus configuration: {0}")]
    InvalidConfiguration(String),

    /// Failed to connect to the backing store
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event on a channel
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Publish attempted while disconnected and offline queueing is disabled
    #[error("Publish rejected for channel '{channel}': backing store is offline")]
    Offline {
        /// The channel that failed
        channel: String,
    },

    /// A queued publish outlived its allowed number of reconnection attempts
    #[error("Publish for channel '{channel}' dropped after {attempts} reconnection attempts")]
    RetriesExhausted {
        /// The channel that failed
        channel: String,
        /// Reconnection attempts observed while the publish was pending
        attempts: u32,
    },

    /// Failed to serialize or deserialize an envelope
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The bus was closed
    #[error("Event bus is closed")]
    Closed,
}

/// Callback invoked with every event published on the subscribed channel.
pub type Listener = Arc<dyn Fn(&RelayEvent) + Send + Sync>;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Future returned by async bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Ready / not-ready callbacks handed to [`EventBus::start`].
///
/// `on_ready` receives `true` only for the first ready transition of the bus
/// instance; later recoveries pass `false`. Callers signal readiness externally on
/// every call and re-arm one-time startup work only when the flag is `true`.
#[derive(Clone)]
pub struct ReadinessCallbacks {
    on_ready: Arc<dyn Fn(bool) + Send + Sync>,
    on_not_ready: Arc<dyn Fn() + Send + Sync>,
}

impl ReadinessCallbacks {
    /// Create callbacks from two closures.
    pub fn new(
        on_ready: impl Fn(bool) + Send + Sync + 'static,
        on_not_ready: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_ready: Arc::new(on_ready),
            on_not_ready: Arc::new(on_not_ready),
        }
    }

    /// Callbacks that do nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {}, || {})
    }
}

impl Default for ReadinessCallbacks {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for ReadinessCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCallbacks").finish_non_exhaustive()
    }
}

/// Trait for event bus implementations.
///
/// Both variants satisfy the same contract:
///
/// - [`start`](Self::start) wires the readiness callbacks and brings the bus up
/// - [`close`](Self::close) releases backing-store connections, safe at any time
/// - [`subscribe`](Self::subscribe) / [`unsubscribe`](Self::unsubscribe) manage
///   per-channel listeners, many listeners may share a channel
/// - [`publish`](Self::publish) delivers to every local listener of the channel
///   and, when replicated, to listeners on every other instance
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; sessions subscribe and unsubscribe
/// concurrently while ingress requests publish.
pub trait EventBus: Send + Sync {
    /// Bring the bus up and register readiness callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::InvalidConfiguration`] if the bus cannot be
    /// started with its configuration. Connectivity problems are not errors here;
    /// they are reported through the callbacks.
    fn start(&self, callbacks: ReadinessCallbacks) -> BusFuture<'_, ()>;

    /// Release backing-store connections. Idempotent.
    fn close(&self);

    /// Register a listener on a channel.
    fn subscribe(&self, channel: &str, listener: Listener) -> SubscriptionId;

    /// Remove a listener. Returns `false` if it was not registered on `channel`.
    fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool;

    /// Number of local listeners on a channel. Diagnostic only.
    fn subscribers_count(&self, channel: &str) -> usize;

    /// Publish an event on a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be handed to the backing store.
    /// The bus does not retry; the caller decides how to report the failure.
    fn publish(&self, channel: &str, event: &RelayEvent) -> BusFuture<'_, ()>;

    /// Whether the bus is currently ready to deliver.
    fn is_ready(&self) -> bool;
}

/// Per-channel listener table shared by both bus variants.
///
/// Mutation happens only on session connect and disconnect. Dispatch copies the
/// listener list out of the lock before invoking anything, so a listener may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    channels: RwLock<HashMap<String, Vec<(SubscriptionId, Listener)>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning its handle.
    pub fn subscribe(&self, channel: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Empty channels are dropped from the table.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = channels.get_mut(channel) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            channels.remove(channel);
        }
        removed
    }

    /// Number of listeners on a channel.
    pub fn count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener of `channel` in registration order.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, channel: &str, event: &RelayEvent) -> usize {
        let listeners: Vec<Listener> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener(event);
        }

        tracing::trace!(channel = %channel, listeners = listeners.len(), "Dispatched event");
        listeners.len()
    }
}

/// Fires readiness callbacks with first-time tracking.
#[derive(Default)]
pub struct ReadinessNotifier {
    callbacks: Mutex<Option<ReadinessCallbacks>>,
    ready_fired: AtomicBool,
}

impl ReadinessNotifier {
    /// Create a notifier with no callbacks installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the callbacks.
    pub fn install(&self, callbacks: ReadinessCallbacks) {
        *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
    }

    /// Signal a ready transition. The first one ever passes `true`.
    pub fn ready(&self) {
        let first = !self.ready_fired.swap(true, Ordering::SeqCst);
        if let Some(callbacks) = self.current() {
            (callbacks.on_ready)(first);
        }
    }

    /// Signal a not-ready transition.
    pub fn not_ready(&self) {
        if let Some(callbacks) = self.current() {
            (callbacks.on_not_ready)();
        }
    }

    fn current(&self) -> Option<ReadinessCallbacks> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &RelayEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn event_bus_is_dyn_compatible() {
        fn assert_dyn(_: Option<&dyn EventBus>) {}
        assert_dyn(None);
    }

    #[test]
    fn registry_counts_and_removes_listeners() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = registry.subscribe("alpha", counting_listener(&counter));
        let b = registry.subscribe("alpha", counting_listener(&counter));
        assert_eq!(registry.count("alpha"), 2);
        assert_ne!(a, b);

        assert!(registry.unsubscribe("alpha", a));
        assert!(!registry.unsubscribe("alpha", a));
        assert!(!registry.unsubscribe("beta", b));
        assert_eq!(registry.count("alpha"), 1);
    }

    #[test]
    fn dispatch_runs_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            registry.subscribe(
                "ordered",
                Arc::new(move |_event: &RelayEvent| order.lock().unwrap().push(n)),
            );
        }

        let event = RelayEvent::builder("/").build();
        assert_eq!(registry.dispatch("ordered", &event), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&registry);
        let inner_slot = Arc::clone(&slot);
        let id = registry.subscribe(
            "once",
            Arc::new(move |_event: &RelayEvent| {
                if let Some(id) = *inner_slot.lock().unwrap() {
                    inner.unsubscribe("once", id);
                }
            }),
        );
        *slot.lock().unwrap() = Some(id);

        registry.dispatch("once", &RelayEvent::builder("/").build());
        assert_eq!(registry.count("once"), 0);
    }

    #[test]
    fn notifier_flags_only_the_first_ready() {
        let notifier = ReadinessNotifier::new();
        let flags = Arc::new(Mutex::new(Vec::new()));
        let not_ready = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&flags);
        let nr = Arc::clone(&not_ready);
        notifier.install(ReadinessCallbacks::new(
            move |first| sink.lock().unwrap().push(first),
            move || {
                nr.fetch_add(1, Ordering::SeqCst);
            },
        ));

        notifier.ready();
        notifier.ready();
        notifier.not_ready();
        notifier.ready();

        assert_eq!(*flags.lock().unwrap(), vec![true, false, false]);
        assert_eq!(not_ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notifier_without_callbacks_is_silent() {
        let notifier = ReadinessNotifier::new();
        notifier.ready();
        notifier.not_ready();
    }
}

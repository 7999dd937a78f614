//! In-process event bus.
//!
//! Used when no backing store is configured. There is nothing to connect to, so
//! `start` signals ready immediately and `publish` completes once every local
//! listener has run.

use crate::event::RelayEvent;
use crate::event_bus::{
    BusFuture, EventBus, Listener, ListenerRegistry, ReadinessCallbacks, ReadinessNotifier,
    SubscriptionId,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-process [`EventBus`] keyed by channel name.
#[derive(Default)]
pub struct LocalEventBus {
    registry: ListenerRegistry,
    notifier: ReadinessNotifier,
    started: AtomicBool,
}

impl LocalEventBus {
    /// Create a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for LocalEventBus {
    fn start(&self, callbacks: ReadinessCallbacks) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.notifier.install(callbacks);
            self.started.store(true, Ordering::SeqCst);
            tracing::info!("Local event bus ready");
            self.notifier.ready();
            Ok(())
        })
    }

    fn close(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            tracing::info!("Local event bus closed");
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
        let delivered = self.registry.dispatch(channel, event);
        tracing::debug!(channel = %channel, delivered, "Published event locally");
        Box::pin(async { Ok(()) })
    }

    fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

//! # Webhook Relay Core
//!
//! Core types and traits shared by the relay server, the relay client and the
//! event bus implementations.
//!
//! ## Core Concepts
//!
//! - **Channel**: a plain string under which sessions subscribe and producers publish
//! - **RelayEvent**: the normalized form of one inbound webhook request
//! - **EventBus**: pub/sub contract, implemented in-process by [`LocalEventBus`]
//!   and across instances by the Redis-backed bus
//! - **Clock**: injected time source, so event timestamps are testable
//!
//! ## Data Flow
//!
//! ```text
//! Producer ──POST──▶ ingress ──publish──▶ EventBus ──▶ session listeners ──SSE──▶ client ──POST──▶ target
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use webhook_relay_core::event::RelayEvent;
//! use webhook_relay_core::event_bus::EventBus;
//! use webhook_relay_core::local::LocalEventBus;
//!
//! # async fn example() -> Result<(), webhook_relay_core::event_bus::EventBusError> {
//! let bus = LocalEventBus::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! bus.subscribe("test", Arc::new(move |event: &RelayEvent| {
//!     sink.lock().unwrap().push(event.body.clone());
//! }));
//!
//! let event = RelayEvent::builder("/webhooks/test").body("{}").build();
//! bus.publish("test", &event).await?;
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod event_bus;
pub mod local;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use event::{ConnectionReadyEvent, MultiValue, RelayEvent};
pub use event_bus::{EventBus, EventBusError, Listener, ReadinessCallbacks, SubscriptionId};
pub use local::LocalEventBus;

/// Environment module - injectable dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The relay stamps every [`RelayEvent`](crate::event::RelayEvent) with the
    /// publish time. Handlers take the clock through their state, so tests can
    /// substitute a fixed one.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Milliseconds since the Unix epoch.
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

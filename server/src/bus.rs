//! Event bus selection.

use crate::config::Config;
use std::sync::Arc;
use webhook_relay_core::event_bus::{EventBus, EventBusError};
use webhook_relay_core::local::LocalEventBus;
use webhook_relay_redis::RedisEventBus;

/// Build the event bus the configuration asks for.
///
/// A configured Redis URL selects the replicated bus; otherwise events stay
/// in-process.
///
/// # Errors
///
/// Returns [`EventBusError::InvalidConfiguration`] if the Redis settings are
/// unusable.
pub fn create_event_bus(config: &Config) -> Result<Arc<dyn EventBus>, EventBusError> {
    match &config.redis {
        Some(redis) => {
            tracing::info!(topic = %redis.topic, "Using Redis event bus");
            Ok(Arc::new(RedisEventBus::new(redis.clone())?))
        }
        None => {
            tracing::info!("Using local event bus");
            Ok(Arc::new(LocalEventBus::new()))
        }
    }
}

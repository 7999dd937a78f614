//! # Webhook Relay Server
//!
//! Accepts webhooks over HTTP and pushes them to subscribed relay clients over
//! Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  POST /webhooks/:channel  ┌──────────┐
//! │   Producer   │──────────────────────────▶│ ingress  │──┐
//! └──────────────┘                           └──────────┘  │ publish
//!                                                          ▼
//!                                                   ┌────────────┐
//!                                                   │  EventBus  │ local or Redis
//!                                                   └────────────┘
//!                                                          │ listener
//! ┌──────────────┐  GET /subscribe/:channel  ┌──────────┐  │
//! │ Relay client │◀──────── SSE ─────────────│ session  │◀─┘
//! └──────────────┘                           └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use webhook_relay_core::local::LocalEventBus;
//! use webhook_relay_server::{RelayServer, config::ServerConfig};
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = RelayServer::bind(&ServerConfig::default(), Arc::new(LocalEventBus::new())).await?;
//! let handle = server.handle();
//! tokio::spawn(server.serve(std::future::pending()));
//! // ...
//! handle.close();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod bus;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use bus::create_event_bus;
pub use config::{Config, ConfigError};
pub use error::AppError;
pub use router::relay_router;
pub use server::{RelayServer, ServerHandle, readiness_callbacks};
pub use state::AppState;

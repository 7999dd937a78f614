//! # Webhook Relay Client
//!
//! Opens an outbound push channel to a relay server and forwards every
//! relayed webhook to a local target service. Runs behind NAT or a firewall;
//! the target never needs to accept inbound connections from the internet.
//!
//! ## Architecture
//!
//! ```text
//! relay server ──SSE──▶ SseDecoder ──▶ RelayClient loop ──spawn──▶ Forwarder ──POST──▶ target
//!                                          │
//!                                       Watchdog (reset on ready/heartbeat)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use webhook_relay_client::{ClientConfig, RelayClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RelayClient::new(ClientConfig::from_env()?)?;
//! client.start();
//! tokio::signal::ctrl_c().await?;
//! client.close();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod forward;
pub mod sse;

pub use client::{ClientStats, ConnectionState, RelayClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ForwardError, StreamError};
pub use forward::Forwarder;
pub use sse::{ServerEvent, SseDecoder, SseFrame};

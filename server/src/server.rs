//! Relay server lifecycle.
//!
//! [`RelayServer`] binds the listener, serves the router and, on close, stops
//! accepting connections and ends every live session so the graceful drain can
//! finish. The event bus is owned by the caller and closed separately, after
//! the server has drained.

use crate::config::ServerConfig;
use crate::router::relay_router;
use crate::state::AppState;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use webhook_relay_core::environment::Clock;
use webhook_relay_core::event_bus::{EventBus, ReadinessCallbacks};
use webhook_relay_runtime::health::ReadinessState;
use webhook_relay_runtime::metrics::MetricsRecorder;

/// A bound, not yet serving, relay server.
pub struct RelayServer {
    listener: TcpListener,
    state: AppState,
    sessions: Arc<watch::Sender<bool>>,
}

/// Closes a [`RelayServer`] from another task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    sessions: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Stop accepting connections and end every live session.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if !self.sessions.send_replace(true) {
            tracing::info!("Closing relay server");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.sessions.borrow()
    }
}

impl RelayServer {
    /// Bind to `config.host:config.port`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub async fn bind(config: &ServerConfig, bus: Arc<dyn EventBus>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let (state, sessions) = AppState::new(bus, config.heartbeat_interval);
        let state = state
            .with_auth_token(config.auth_token.as_deref())
            .with_session_buffer(config.session_buffer)
            .with_max_payload_size(config.max_payload_size);

        tracing::debug!(
            addr = %listener.local_addr()?,
            heartbeat_ms = config.heartbeat_interval.as_millis(),
            auth = config.auth_token.is_some(),
            "Relay server bound"
        );

        Ok(Self {
            listener,
            state,
            sessions: Arc::new(sessions),
        })
    }

    /// Stamp published events with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state = self.state.with_clock(clock);
        self
    }

    /// Serve `/metrics` from `recorder`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: Arc<MetricsRecorder>) -> Self {
        self.state = self.state.with_metrics(recorder);
        self
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Flags behind `/health` and `/ready`; feed bus callbacks into these.
    #[must_use]
    pub fn readiness(&self) -> Arc<ReadinessState> {
        Arc::clone(&self.state.readiness)
    }

    /// A handle that can close the server while [`serve`](Self::serve) runs.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Stop accepting connections and end every live session.
    pub fn close(&self) {
        self.handle().close();
    }

    /// Serve until `shutdown` resolves or the server is closed, then drain.
    ///
    /// Returns once every connection has finished. Bound the drain by
    /// wrapping this future in a timeout.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the server fails while accepting.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        let router = relay_router(self.state.clone());
        let sessions = Arc::clone(&self.sessions);
        let mut closed = self.sessions.subscribe();
        let closed = async move {
            let _ = closed.wait_for(|stop| *stop).await;
        };

        self.state.readiness.mark_listening();
        tracing::info!(addr = %addr, "Relay server listening");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown => {}
                    () = closed => {}
                }
                // Sessions never end on their own; end them so the drain can finish.
                sessions.send_replace(true);
                tracing::info!("Relay server stopped accepting connections");
            })
            .await?;

        tracing::info!("Relay server drained");
        Ok(())
    }
}

/// Bus callbacks that keep `readiness` in step with the event bus.
#[must_use]
pub fn readiness_callbacks(readiness: Arc<ReadinessState>) -> ReadinessCallbacks {
    let on_not_ready = Arc::clone(&readiness);
    ReadinessCallbacks::new(
        move |first| {
            readiness.mark_bus_ready();
            if first {
                tracing::info!("Event bus ready");
            } else {
                tracing::info!("Event bus recovered");
            }
        },
        move || {
            on_not_ready.mark_bus_failed();
            tracing::error!("Event bus gave up reconnecting");
        },
    )
}

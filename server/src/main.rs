//! Webhook relay server binary.
//!
//! Configuration comes from the environment (and `.env` when present). See
//! [`Config`] for the variables.

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_relay_runtime::metrics::MetricsRecorder;
use webhook_relay_runtime::shutdown::{ShutdownCoordinator, install_panic_hook, wait_for_signal};
use webhook_relay_server::{Config, RelayServer, create_event_bus, readiness_callbacks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_relay_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_panic_hook();

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        addr = %config.server.bind_addr(),
        heartbeat_ms = config.server.heartbeat_interval.as_millis(),
        max_payload_size = config.server.max_payload_size,
        redis = config.redis.is_some(),
        "Configuration loaded"
    );

    let mut recorder = MetricsRecorder::new();
    if let Err(e) = recorder.install() {
        warn!(error = %e, "Metrics disabled");
    }

    let bus = create_event_bus(&config).context("Invalid event bus configuration")?;
    let server = RelayServer::bind(&config.server, Arc::clone(&bus))
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr()))?
        .with_metrics(Arc::new(recorder));
    let readiness = server.readiness();
    let handle = server.handle();

    bus.start(readiness_callbacks(Arc::clone(&readiness)))
        .await
        .context("Failed to start event bus")?;

    let mut serving = tokio::spawn(server.serve(std::future::pending()));

    tokio::select! {
        signal = wait_for_signal() => {
            signal.context("Failed to install signal handlers")?;
        }
        result = &mut serving => {
            bus.close();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Relay server failed"),
                Err(e) => Err(e).context("Relay server task failed"),
            };
        }
    }

    let mut coordinator = ShutdownCoordinator::new(config.shutdown.timeout);

    coordinator.step("readiness", move || async move {
        readiness.mark_shutting_down();
        Ok(())
    });

    let delay = config.shutdown.delay;
    coordinator.step("delay", move || async move {
        tokio::time::sleep(delay).await;
        Ok(())
    });

    let drain = config.shutdown.drain_timeout;
    coordinator.step("server", move || async move {
        handle.close();
        let abort = serving.abort_handle();
        match tokio::time::timeout(drain, serving).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => {
                abort.abort();
                Err(format!("connections still open after {drain:?}"))
            }
        }
    });

    let closing = Arc::clone(&bus);
    coordinator.step("event-bus", move || async move {
        closing.close();
        Ok(())
    });

    if let Err(e) = coordinator.shutdown().await {
        error!(error = %e, "Shutdown did not complete cleanly");
        return Err(e.into());
    }
    Ok(())
}

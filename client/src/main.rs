//! Webhook relay client binary.
//!
//! Configuration comes from the environment (and `.env` when present). See
//! [`ClientConfig`] for the variables.

use anyhow::Context;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_relay_client::{ClientConfig, RelayClient};
use webhook_relay_runtime::shutdown::{ShutdownCoordinator, install_panic_hook, wait_for_signal};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_relay_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    install_panic_hook();

    let config = ClientConfig::from_env().context("Invalid configuration")?;
    info!(
        source = %config.source_url,
        target = %config.target_base_url,
        auth = config.auth_token.is_some(),
        "Configuration loaded"
    );

    let client = RelayClient::new(config).context("Failed to create relay client")?;
    client.start();

    wait_for_signal()
        .await
        .context("Failed to install signal handlers")?;

    let mut coordinator = ShutdownCoordinator::new(SHUTDOWN_TIMEOUT);
    let closing = client.clone();
    coordinator.step("relay-client", move || async move {
        closing.close();
        Ok(())
    });

    if let Err(e) = coordinator.shutdown().await {
        error!(error = %e, "Shutdown did not complete cleanly");
        return Err(e.into());
    }

    let stats = client.stats();
    info!(
        forwarded = stats.forwarded,
        failed = stats.failed,
        recoveries = stats.recoveries,
        "Relay client stopped"
    );
    Ok(())
}

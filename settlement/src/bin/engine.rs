//! Settlement engine service
//!
//! Opens the wallet, starts the reconciliation sweeper, and serves
//! settlement requests through the library API until interrupted.

use anyhow::Context;
use settlement::{Config, ReconcileSweeper};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wallet_core::Wallet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Config file from argv, else environment overrides on defaults
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    info!(
        "🚀 {} v{} starting",
        config.service_name, config.service_version
    );

    let wallet_config = wallet_core::Config {
        data_dir: config.wallet_data_dir.clone(),
        ..Default::default()
    };
    let wallet = Wallet::open(&wallet_config).context("Failed to open wallet")?;
    let handle = wallet.handle();

    let publisher = if config.events.enabled {
        let nats_config = event_bus::NatsConfig {
            url: config.events.nats_url.clone(),
            ..Default::default()
        };
        let client = Arc::new(event_bus::NatsClient::new(nats_config));
        Some(Arc::new(event_bus::EventPublisher::new(
            client,
            event_bus::PublisherConfig::default(),
        )))
    } else {
        None
    };

    let mut sweeper = ReconcileSweeper::new(
        handle,
        Duration::from_secs(config.sweep.interval_secs),
        config.sweep.attempt_retention_hours,
    );
    if let Some(publisher) = publisher {
        sweeper = sweeper.with_publisher(publisher);
    }

    tokio::spawn(Arc::new(sweeper).start());
    info!("✅ Settlement engine ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    wallet.shutdown().await.context("Wallet shutdown failed")?;

    Ok(())
}

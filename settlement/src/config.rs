//! Configuration for the settlement engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Wallet data directory
    pub wallet_data_dir: PathBuf,

    /// Reconciliation sweep configuration
    pub sweep: SweepConfig,

    /// Event bus configuration
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            wallet_data_dir: PathBuf::from("./data/wallet"),
            sweep: SweepConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Reconciliation sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweeps (default: hourly)
    pub interval_secs: u64,

    /// Attempt rows older than this many hours are pruned
    pub attempt_retention_hours: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            attempt_retention_hours: 24,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Publish settlement events to NATS
    pub enabled: bool,

    /// NATS server URL
    pub nats_url: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nats_url: "nats://localhost:4222".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("SETTLEMENT_WALLET_DIR") {
            config.wallet_data_dir = PathBuf::from(dir);
        }

        if let Ok(secs) = std::env::var("SETTLEMENT_SWEEP_INTERVAL_SECS") {
            config.sweep.interval_secs = secs
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid sweep interval: {}", e)))?;
        }

        if let Ok(url) = std::env::var("SETTLEMENT_NATS_URL") {
            config.events.nats_url = url;
        }

        if let Ok(enabled) = std::env::var("SETTLEMENT_EVENTS_ENABLED") {
            config.events.enabled = enabled == "1" || enabled.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }
}

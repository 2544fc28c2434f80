//! Lazy NATS client
//!
//! The connection is established on first use, so the settlement engine
//! can start (and settle) even when the bus is temporarily down; the
//! publisher's retry loop picks the connection up once it returns.

use crate::{metrics::NATS_CONNECTION_STATUS, Error, Result};
use async_nats::jetstream::{
    self,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Stream retention for published events
    pub max_age: Duration,

    /// Server-side deduplication window
    pub duplicate_window: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            max_age: Duration::from_secs(7 * 24 * 3600),
            duplicate_window: Duration::from_secs(300),
        }
    }
}

/// NATS client with lazy connection
pub struct NatsClient {
    config: NatsConfig,
    client: RwLock<Option<async_nats::Client>>,
}

impl NatsClient {
    /// Create new client (does not connect)
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    /// Get the underlying connection, connecting on first use
    pub async fn client(&self) -> Result<async_nats::Client> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut guard = self.client.write().await;
        // Another task may have connected while we waited for the lock
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        info!(url = %self.config.url, "Connecting to NATS");
        let client = async_nats::connect(&self.config.url).await.map_err(|e| {
            NATS_CONNECTION_STATUS.with_label_values(&["failed"]).inc();
            Error::Connection(e.to_string())
        })?;

        NATS_CONNECTION_STATUS
            .with_label_values(&["connected"])
            .inc();
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Get a JetStream context over the lazy connection
    pub async fn jetstream(&self) -> Result<jetstream::Context> {
        let client = self.client().await?;
        Ok(jetstream::new(client))
    }

    /// Ensure a stream exists, creating it with our retention defaults
    pub async fn get_or_create_stream(
        &self,
        name: &str,
        subjects: Vec<String>,
    ) -> Result<()> {
        let js = self.jetstream().await?;

        let config = StreamConfig {
            name: name.to_string(),
            subjects,
            retention: RetentionPolicy::Limits,
            max_age: self.config.max_age,
            storage: StorageType::File,
            duplicate_window: self.config.duplicate_window,
            ..Default::default()
        };

        js.get_or_create_stream(config)
            .await
            .map_err(|e| Error::StreamCreation(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for NatsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsClient")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

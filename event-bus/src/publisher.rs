//! Event publisher with at-least-once delivery
//!
//! A publish that fails after the settlement already committed is retried
//! on a capped exponential schedule, and consumers must deduplicate by
//! event id (the JetStream duplicate window handles the common case
//! server-side).

use crate::{
    client::NatsClient,
    event::Event,
    metrics::{EVENT_PUBLISH_DURATION, EVENT_PUBLISH_TOTAL},
    types::EventType,
    Error, Result,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Capped exponential retry schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles per attempt after that
    pub base_delay: Duration,

    /// Ceiling for the doubled delay
    pub delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            delay_cap: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before the given attempt (1-based; the first
    /// attempt runs immediately)
    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 2).min(16);
        (self.base_delay * 2u32.pow(doublings)).min(self.delay_cap)
    }
}

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Enable JetStream persistence
    pub use_jetstream: bool,

    /// Per-attempt publish timeout
    pub publish_timeout: Duration,

    /// Retry schedule
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            use_jetstream: true,
            publish_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Event publisher
pub struct EventPublisher {
    client: Arc<NatsClient>,
    config: PublisherConfig,
}

impl EventPublisher {
    /// Create new publisher
    pub fn new(client: Arc<NatsClient>, config: PublisherConfig) -> Self {
        Self { client, config }
    }

    /// Publish event, retrying per the configured schedule
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let start = Instant::now();
        let subject = event.subject();
        let payload = event.to_bytes()?;

        info!(event_id = %event.id, subject = %subject, "Publishing event");

        // At least one attempt regardless of configuration
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut result = Ok(());
        for attempt in 1..=max_attempts {
            let pause = self.config.retry.delay_before(attempt);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            result = self.attempt(&subject, &payload, event.event_type).await;
            match &result {
                Ok(_) => {
                    if attempt > 1 {
                        info!(attempt, event_id = %event.id, "Event published after retries");
                    }
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(attempt, error = %e, "Publish failed, will retry");
                }
                Err(e) => {
                    error!(attempt, error = %e, event_id = %event.id, "Event publish gave up");
                }
            }
        }

        EVENT_PUBLISH_DURATION
            .with_label_values(&[event.event_type.subject_prefix()])
            .observe(start.elapsed().as_secs_f64());
        EVENT_PUBLISH_TOTAL
            .with_label_values(&[
                event.event_type.subject_prefix(),
                if result.is_ok() { "success" } else { "error" },
            ])
            .inc();

        result
    }

    /// One bounded publish attempt
    async fn attempt(&self, subject: &str, payload: &[u8], event_type: EventType) -> Result<()> {
        let send = async {
            if self.config.use_jetstream {
                self.send_jetstream(subject, payload, event_type).await
            } else {
                self.send_core(subject, payload).await
            }
        };

        tokio::time::timeout(self.config.publish_timeout, send)
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(self.config.publish_timeout.as_millis() as u64))
            })
    }

    /// Persistent publish: stream ensured, server ack awaited
    async fn send_jetstream(
        &self,
        subject: &str,
        payload: &[u8],
        event_type: EventType,
    ) -> Result<()> {
        let js = self.client.jetstream().await?;

        self.client
            .get_or_create_stream(
                event_type.stream_name(),
                vec![format!("{}.>", event_type.subject_prefix())],
            )
            .await?;

        let ack = js
            .publish(subject.to_string(), bytes::Bytes::copy_from_slice(payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        ack.await
            .map_err(|e| Error::Publish(format!("Publish ack failed: {}", e)))?;

        Ok(())
    }

    /// Fire-and-forget core NATS publish, flushed
    async fn send_core(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let client = self.client.client().await?;

        client
            .publish(subject.to_string(), bytes::Bytes::copy_from_slice(payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        client
            .flush()
            .await
            .map_err(|e| Error::Publish(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Event Bus with NATS support
//!
//! Provides pub/sub event publishing with:
//! - Partitioning by shipment and balance owner
//! - JetStream for persistence and at-least-once delivery
//! - Retry logic with exponential backoff
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod event;
pub mod metrics;
pub mod publisher;
pub mod types;

pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use event::Event;
pub use publisher::{EventPublisher, PublisherConfig, RetryPolicy};
pub use types::{EventType, PartitionKey};

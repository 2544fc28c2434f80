//! Event envelope for pub/sub

use crate::types::{EventType, PartitionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Event type
    pub event_type: EventType,

    /// Partition key for routing
    pub partition_key: PartitionKey,

    /// Payload (JSON-serialized)
    pub payload: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Correlation ID (for tracing)
    pub correlation_id: Option<String>,

    /// Headers (metadata)
    pub headers: std::collections::HashMap<String, String>,
}

impl Event {
    /// Create new event
    pub fn new(
        event_type: EventType,
        partition_key: PartitionKey,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            partition_key,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            headers: std::collections::HashMap::new(),
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Get NATS subject for this event
    pub fn subject(&self) -> String {
        format!(
            "{}.{}",
            self.event_type.subject_prefix(),
            self.partition_key.to_subject_segment()
        )
    }
}

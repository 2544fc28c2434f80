//! Type definitions for the event bus

use serde::{Deserialize, Serialize};

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A shipment was verified and its settlement committed
    DeliverySettled,
    /// The reconciler corrected a drifted balance snapshot
    BalanceCorrected,
}

impl EventType {
    /// Get NATS subject prefix for this event type
    pub fn subject_prefix(&self) -> &'static str {
        match self {
            EventType::DeliverySettled => "swiftship.delivery.settled",
            EventType::BalanceCorrected => "swiftship.wallet.corrected",
        }
    }

    /// Get JetStream stream name for this event type
    pub fn stream_name(&self) -> &'static str {
        match self {
            EventType::DeliverySettled => "DELIVERY_SETTLEMENTS",
            EventType::BalanceCorrected => "WALLET_CORRECTIONS",
        }
    }
}

/// Partition key for routing events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKey {
    /// Partition by shipment ID
    Shipment(String),
    /// Partition by balance owner (e.g. "courier:<uuid>")
    Owner(String),
    /// Broadcast to all partitions
    Broadcast,
}

impl PartitionKey {
    /// Get partitioning string for NATS subject
    pub fn to_subject_segment(&self) -> String {
        match self {
            PartitionKey::Shipment(id) => format!("shipment.{}", sanitize_subject(id)),
            PartitionKey::Owner(id) => format!("owner.{}", sanitize_subject(id)),
            PartitionKey::Broadcast => "broadcast".to_string(),
        }
    }

    /// Compute partition number for load balancing
    pub fn partition_number(&self, num_partitions: u32) -> u32 {
        let hash = match self {
            PartitionKey::Shipment(id) => blake3::hash(id.as_bytes()),
            PartitionKey::Owner(id) => blake3::hash(id.as_bytes()),
            PartitionKey::Broadcast => return 0, // Broadcast goes to partition 0
        };

        let hash_bytes = hash.as_bytes();
        let hash_u32 =
            u32::from_le_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
        hash_u32 % num_partitions
    }
}

/// Sanitize string for use in NATS subject
fn sanitize_subject(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_subject() {
        let key = PartitionKey::Shipment("0192b1c4-dead-beef-0000-000000000001".to_string());
        assert_eq!(
            key.to_subject_segment(),
            "shipment.0192b1c4-dead-beef-0000-000000000001"
        );

        let key = PartitionKey::Owner("courier:abc123".to_string());
        assert_eq!(key.to_subject_segment(), "owner.courier_abc123");
    }

    #[test]
    fn test_partition_number() {
        let key = PartitionKey::Shipment("SHP-1001".to_string());
        let partition = key.partition_number(32);
        assert!(partition < 32);

        // Same key should always hash to same partition
        let partition2 = key.partition_number(32);
        assert_eq!(partition, partition2);

        // Different keys should likely hash to different partitions
        let key2 = PartitionKey::Shipment("SHP-2002".to_string());
        let partition3 = key2.partition_number(32);
        assert_ne!(partition, partition3);
    }

    #[test]
    fn test_sanitize_subject() {
        assert_eq!(sanitize_subject("courier:abc"), "courier_abc");
        assert_eq!(sanitize_subject("SHP-1001"), "SHP-1001");
    }
}

//! Messaging channel abstraction
//!
//! Delivery of the code to the recipient (SMS, WhatsApp) is an external
//! concern behind this trait. The engine treats the channel as
//! unreliable; retries are governed by the issuance rate limit, not by
//! the channel itself.

use async_trait::async_trait;
use thiserror::Error;

/// Transport the code was delivered over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Plain SMS
    Sms,
    /// WhatsApp message
    WhatsApp,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Sms => write!(f, "sms"),
            ChannelKind::WhatsApp => write!(f, "whatsapp"),
        }
    }
}

/// Successful delivery receipt
#[derive(Debug, Clone)]
pub struct ChannelReceipt {
    /// Kind of channel that carried the code
    pub channel: ChannelKind,
}

/// Channel delivery failure
#[derive(Debug, Error)]
#[error("Channel unavailable: {0}")]
pub struct ChannelError(pub String);

/// External messaging collaborator
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Deliver a code to the destination phone number
    async fn send(&self, destination: &str, code: &str)
        -> std::result::Result<ChannelReceipt, ChannelError>;
}

/// Test channel: configurable outcome, records every send
#[derive(Debug)]
pub struct MockChannel {
    available: bool,
    kind: ChannelKind,
    sent: tokio::sync::Mutex<Vec<(String, String)>>,
}

impl MockChannel {
    /// Channel that always delivers
    pub fn reliable() -> Self {
        Self {
            available: true,
            kind: ChannelKind::Sms,
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Channel that always fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            kind: ChannelKind::Sms,
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every (destination, code) pair handed to this channel
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessagingChannel for MockChannel {
    async fn send(
        &self,
        destination: &str,
        code: &str,
    ) -> std::result::Result<ChannelReceipt, ChannelError> {
        if !self.available {
            return Err(ChannelError("mock outage".to_string()));
        }

        self.sent
            .lock()
            .await
            .push((destination.to_string(), code.to_string()));

        Ok(ChannelReceipt { channel: self.kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reliable_mock_records_sends() {
        let channel = MockChannel::reliable();
        let receipt = channel.send("+20100000000", "042531").await.unwrap();
        assert_eq!(receipt.channel, ChannelKind::Sms);

        let sent = channel.sent().await;
        assert_eq!(sent, vec![("+20100000000".to_string(), "042531".to_string())]);
    }

    #[tokio::test]
    async fn test_unavailable_mock_fails() {
        let channel = MockChannel::unavailable();
        assert!(channel.send("+20100000000", "042531").await.is_err());
        assert!(channel.sent().await.is_empty());
    }
}

//! Verification Code Manager
//!
//! Issues time-boxed one-time delivery codes and validates submissions.
//! Both paths are rate-limited per shipment through durable attempt rows,
//! so the limits hold across concurrent service instances. A successful
//! validation triggers settlement; the verified code and the settlement
//! entries commit in the same atomic batch.

use crate::{
    channel::{ChannelKind, MessagingChannel},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use settlement::SettlementEngine;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use wallet_core::{
    AttemptAdmission, AttemptKind, SettlementOutcome, ShipmentStatus, VerificationCode,
    WalletHandle,
};

/// Code length in digits
const CODE_LEN: usize = 6;

/// Rate-limit and TTL configuration
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// Code TTL in seconds
    pub ttl_secs: i64,

    /// Max issuances per shipment per window
    pub issue_limit: usize,

    /// Issuance window in seconds
    pub issue_window_secs: i64,

    /// Max validation attempts per shipment per window
    pub validate_limit: usize,

    /// Validation window in seconds
    pub validate_window_secs: i64,

    /// Retry-after hint when the messaging channel is down
    pub channel_retry_secs: u64,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            issue_limit: 3,
            issue_window_secs: 60,
            validate_limit: 5,
            validate_window_secs: 300,
            channel_retry_secs: 30,
        }
    }
}

/// Successful issuance receipt
#[derive(Debug, Clone)]
pub struct IssueReceipt {
    /// Channel that carried the code
    pub channel: ChannelKind,

    /// Seconds until the code expires
    pub expires_in_secs: i64,
}

/// Successful verification outcome
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// Code matched and the settlement committed
    Settled {
        /// Ledger entries created by the settlement
        entry_count: usize,
    },
    /// Code was already verified; idempotent success, nothing re-settled
    AlreadyVerified,
}

/// Verification Code Manager
pub struct CodeManager {
    handle: WalletHandle,
    engine: SettlementEngine,
    channel: Arc<dyn MessagingChannel>,
    config: CodeConfig,
}

impl CodeManager {
    /// Create new code manager
    pub fn new(
        handle: WalletHandle,
        engine: SettlementEngine,
        channel: Arc<dyn MessagingChannel>,
        config: CodeConfig,
    ) -> Self {
        Self {
            handle,
            engine,
            channel,
            config,
        }
    }

    /// Issue a delivery code for a shipment and hand it to the channel.
    ///
    /// Replaces any live predecessor code. Channel failure surfaces as
    /// `ServiceUnavailable` and the stored code stays valid.
    pub async fn issue_code(&self, shipment_id: Uuid) -> Result<IssueReceipt> {
        let shipment = self.handle.get_shipment(shipment_id).await?;

        if shipment.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Shipment is {:?}",
                shipment.status
            )));
        }

        // Admission counts and records the attempt in one actor step, so
        // racing issuers cannot both squeeze past the limit
        let now = Utc::now();
        self.admit(
            shipment_id,
            AttemptKind::Issue,
            self.config.issue_limit,
            self.config.issue_window_secs,
            now,
        )
        .await?;

        let code = VerificationCode::new(
            shipment_id,
            generate_code(),
            now,
            self.config.ttl_secs,
        );

        // Durable before the send
        self.handle.put_code(code.clone()).await?;

        info!(
            shipment_id = %shipment_id,
            expires_at = %code.expires_at,
            "Issued verification code"
        );

        match self.channel.send(&shipment.recipient_phone, &code.code).await {
            Ok(receipt) => Ok(IssueReceipt {
                channel: receipt.channel,
                expires_in_secs: self.config.ttl_secs,
            }),
            Err(e) => {
                // The code stays valid; the caller retries once the
                // channel recovers, still bounded by the issue window
                warn!(shipment_id = %shipment_id, error = %e, "Channel send failed");
                Err(Error::ServiceUnavailable {
                    retry_after_secs: self.config.channel_retry_secs,
                })
            }
        }
    }

    /// Validate a submitted code; a match triggers settlement.
    ///
    /// Malformed input is rejected before any lookup and does not consume
    /// attempt budget; every well-formed submission consumes one. A
    /// re-submitted already-verified code is an idempotent success.
    pub async fn verify_code(&self, shipment_id: Uuid, submitted: &str) -> Result<VerifyOutcome> {
        if !is_well_formed(submitted) {
            return Err(Error::InvalidFormat);
        }

        // Every well-formed submission is admitted (and counted) before the
        // lookup, in one atomic actor step
        let now = Utc::now();
        self.admit(
            shipment_id,
            AttemptKind::Validate,
            self.config.validate_limit,
            self.config.validate_window_secs,
            now,
        )
        .await?;

        let code = self
            .handle
            .get_code(shipment_id)
            .await?
            .ok_or_else(|| Error::NotFound(shipment_id.to_string()))?;

        if code.verified {
            return Ok(VerifyOutcome::AlreadyVerified);
        }

        if code.is_expired(now) {
            return Err(Error::Expired);
        }

        if code.code != submitted {
            return Err(Error::InvalidCode);
        }

        // The verified code rides in the settlement commit itself, so
        // mark-verified and settle are one atomic unit
        let verified = code.into_verified(now);
        let outcome = self.engine.settle(shipment_id, Some(verified)).await?;

        match outcome {
            SettlementOutcome::Settled { entry_count, .. } => {
                info!(shipment_id = %shipment_id, entry_count, "Delivery verified and settled");
                Ok(VerifyOutcome::Settled { entry_count })
            }
            // A concurrent verify won the race; this call still succeeds
            SettlementOutcome::AlreadySettled => Ok(VerifyOutcome::AlreadyVerified),
        }
    }

    /// Sliding-window admission over durable attempt rows
    ///
    /// Count-and-record happens inside the single writer; a `Limited`
    /// verdict maps to the kind's rate-limit error.
    async fn admit(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        limit: usize,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let verdict = self
            .handle
            .try_record_attempt(shipment_id, kind, limit, window_secs, now)
            .await?;

        match verdict {
            AttemptAdmission::Admitted => Ok(()),
            AttemptAdmission::Limited { retry_after_secs } => match kind {
                AttemptKind::Issue => Err(Error::RateLimitExceeded { retry_after_secs }),
                AttemptKind::Validate => Err(Error::TooManyAttempts { retry_after_secs }),
            },
        }
    }
}

impl std::fmt::Debug for CodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Fixed-length numeric code, leading zeros preserved
fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

/// Exactly `CODE_LEN` ASCII digits
fn is_well_formed(submitted: &str) -> bool {
    submitted.len() == CODE_LEN && submitted.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_is_well_formed() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(is_well_formed(&code), "bad code: {}", code);
        }
    }

    #[test]
    fn test_format_check() {
        assert!(is_well_formed("000000"));
        assert!(is_well_formed("123456"));
        assert!(!is_well_formed("12345"));
        assert!(!is_well_formed("1234567"));
        assert!(!is_well_formed("12345a"));
        assert!(!is_well_formed("١٢٣٤٥٦")); // non-ASCII digits
        assert!(!is_well_formed(""));
    }

    #[test]
    fn test_default_config() {
        let config = CodeConfig::default();
        assert_eq!(config.ttl_secs, 600);
        assert_eq!(config.issue_limit, 3);
        assert_eq!(config.validate_limit, 5);
    }
}

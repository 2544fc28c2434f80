//! Core types for the delivery wallet
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Fixed sign contracts per ledger entry type

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of balance owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OwnerKind {
    /// Courier wallet (commissions, referral bonuses, withdrawals)
    Courier = 0,
    /// Client wallet (deposits collected on delivery, fees owed)
    Client = 1,
}

impl OwnerKind {
    /// Byte tag used in storage keys
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Parse from storage key byte
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(OwnerKind::Courier),
            1 => Some(OwnerKind::Client),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKind::Courier => write!(f, "courier"),
            OwnerKind::Client => write!(f, "client"),
        }
    }
}

/// Balance owner identifier (kind + user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId {
    /// Owner kind
    pub kind: OwnerKind,
    /// Owner user id
    pub id: Uuid,
}

impl OwnerId {
    /// Create a courier owner id
    pub fn courier(id: Uuid) -> Self {
        Self {
            kind: OwnerKind::Courier,
            id,
        }
    }

    /// Create a client owner id
    pub fn client(id: Uuid) -> Self {
        Self {
            kind: OwnerKind::Client,
            id,
        }
    }

    /// Storage key: kind byte || uuid bytes
    pub fn key_bytes(&self) -> [u8; 17] {
        let mut key = [0u8; 17];
        key[0] = self.kind.as_byte();
        key[1..].copy_from_slice(self.id.as_bytes());
        key
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Shipment lifecycle status
///
/// Only the `OutForDelivery -> Delivered` transition is performed by this
/// engine; everything else belongs to the back office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipmentStatus {
    /// Created, not yet picked up
    Created,
    /// Picked up by a courier
    PickedUp,
    /// Out for delivery, eligible for verification codes
    OutForDelivery,
    /// Delivered and settled (terminal)
    Delivered,
    /// Delivery failed (terminal)
    Failed,
}

impl ShipmentStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Failed)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShipmentStatus::Created => "created",
            ShipmentStatus::PickedUp => "picked_up",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One status-history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status entered
    pub status: ShipmentStatus,
    /// When the status was entered
    pub at: DateTime<Utc>,
}

/// How the client pays for the shipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Courier collects the package value in cash from the recipient
    CashOnDelivery,
    /// Recipient pre-paid by bank transfer; courier remits to the client
    Transfer,
    /// Client pre-paid from their wallet
    WalletPrepaid,
}

/// The slice of a shipment this engine reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    /// Shipment id
    pub shipment_id: Uuid,
    /// Current status
    pub status: ShipmentStatus,
    /// Status history, append-only
    pub status_history: Vec<StatusChange>,
    /// Assigned courier, if any
    pub courier_id: Option<Uuid>,
    /// Owning client
    pub client_id: Uuid,
    /// Recipient phone number (destination for verification codes)
    pub recipient_phone: String,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Declared package value
    pub package_value: Decimal,
    /// Flat shipping fee the client owes the platform
    pub client_flat_rate_fee: Decimal,
    /// Precomputed courier commission for this delivery
    pub courier_commission: Decimal,
    /// Amount the courier remits to the client (transfer shipments)
    pub amount_to_collect: Decimal,
}

impl Shipment {
    /// Append a status change and update the current status
    pub fn record_status(&mut self, status: ShipmentStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_history.push(StatusChange { status, at });
    }
}

/// One outstanding proof-of-delivery challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    /// Shipment the code proves delivery for
    pub shipment_id: Uuid,
    /// Fixed-length numeric code (string to preserve leading zeros)
    pub code: String,
    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,
    /// Expiry timestamp (issued_at + TTL)
    pub expires_at: DateTime<Utc>,
    /// Whether the code has been verified (immutable once true)
    pub verified: bool,
    /// When the code was verified
    pub verified_at: Option<DateTime<Utc>>,
}

impl VerificationCode {
    /// Create a fresh unverified code with the given TTL
    pub fn new(
        shipment_id: Uuid,
        code: impl Into<String>,
        issued_at: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Self {
        Self {
            shipment_id,
            code: code.into(),
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl_secs),
            verified: false,
            verified_at: None,
        }
    }

    /// Whether the code has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Consume the code into its verified form
    pub fn into_verified(mut self, at: DateTime<Utc>) -> Self {
        self.verified = true;
        self.verified_at = Some(at);
        self
    }
}

/// Kind of rate-limited attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttemptKind {
    /// Code issuance request
    Issue = 0,
    /// Code validation request
    Validate = 1,
}

impl AttemptKind {
    /// Byte tag used in storage keys
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Verdict of an atomic count-and-record rate-limit check
///
/// Produced inside the writer actor, so two racing callers can never
/// both be admitted past the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptAdmission {
    /// Under the limit; the attempt row was recorded
    Admitted,
    /// Over the limit; nothing was recorded
    Limited {
        /// Seconds until the oldest blocking attempt leaves the window
        retry_after_secs: u64,
    },
}

/// Sign contract of a ledger entry amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Amount must be strictly positive
    Positive,
    /// Amount must be strictly negative
    Negative,
}

/// Type of an immutable financial fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Courier commission for a delivered shipment
    Commission,
    /// Bonus paid to the courier's referrer per delivery
    ReferralBonus,
    /// Money credited to a client wallet
    Deposit,
    /// Fee debited from a client wallet
    Payment,
    /// Courier withdrawal request (pending until resolved)
    WithdrawalRequest,
    /// Compensating credit after a declined withdrawal
    WithdrawalDeclined,
    /// Manual penalty applied by the back office
    ManualPenalty,
}

impl EntryType {
    /// Fixed sign contract for this entry type
    pub fn sign(&self) -> Sign {
        match self {
            EntryType::Commission
            | EntryType::ReferralBonus
            | EntryType::Deposit
            | EntryType::WithdrawalDeclined => Sign::Positive,
            EntryType::Payment | EntryType::WithdrawalRequest | EntryType::ManualPenalty => {
                Sign::Negative
            }
        }
    }

    /// Status an entry of this type is created with
    pub fn initial_status(&self) -> EntryStatus {
        match self {
            EntryType::WithdrawalRequest => EntryStatus::Pending,
            _ => EntryStatus::Processed,
        }
    }

    /// Withdrawal bookkeeping types are excluded from courier balances
    pub fn is_withdrawal_bookkeeping(&self) -> bool {
        matches!(
            self,
            EntryType::WithdrawalRequest | EntryType::WithdrawalDeclined
        )
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryType::Commission => "commission",
            EntryType::ReferralBonus => "referral_bonus",
            EntryType::Deposit => "deposit",
            EntryType::Payment => "payment",
            EntryType::WithdrawalRequest => "withdrawal_request",
            EntryType::WithdrawalDeclined => "withdrawal_declined",
            EntryType::ManualPenalty => "manual_penalty",
        };
        write!(f, "{}", s)
    }
}

/// Processing status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Counted toward balances
    Processed,
    /// Awaiting resolution (withdrawal requests only)
    Pending,
    /// Resolved negatively (withdrawal requests only)
    Declined,
}

/// An immutable financial fact attributed to one owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id (UUIDv7 for time-ordering)
    pub entry_id: Uuid,
    /// Owner the entry is attributed to
    pub owner: OwnerId,
    /// Entry type
    pub entry_type: EntryType,
    /// Signed amount, validated against the type's sign contract
    pub amount: Decimal,
    /// Processing status
    pub status: EntryStatus,
    /// Shipment that caused the entry, if any
    pub shipment_id: Option<Uuid>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create an entry, enforcing the sign contract at creation time
    pub fn new(
        owner: OwnerId,
        entry_type: EntryType,
        amount: Decimal,
        shipment_id: Option<Uuid>,
    ) -> Result<Self> {
        match entry_type.sign() {
            Sign::Positive if amount <= Decimal::ZERO => {
                return Err(Error::InvalidEntry(format!(
                    "{} requires a positive amount, got {}",
                    entry_type, amount
                )));
            }
            Sign::Negative if amount >= Decimal::ZERO => {
                return Err(Error::InvalidEntry(format!(
                    "{} requires a negative amount, got {}",
                    entry_type, amount
                )));
            }
            _ => {}
        }

        Ok(Self {
            entry_id: Uuid::now_v7(),
            owner,
            entry_type,
            amount,
            status: entry_type.initial_status(),
            shipment_id,
            created_at: Utc::now(),
        })
    }
}

/// Cached, derived balance for one owner
///
/// Written only by the reconciler, never directly by business logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Owner
    pub owner: OwnerId,
    /// Cached balance
    pub current_balance: Decimal,
    /// Lifetime earnings (couriers only; zero for clients)
    pub total_earnings: Decimal,
    /// Last reconciliation timestamp
    pub updated_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// Fresh zero snapshot for a newly created owner
    pub fn zero(owner: OwnerId) -> Self {
        Self {
            owner,
            current_balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// Courier-to-referrer relationship (read-only for this engine)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralLink {
    /// Referred courier
    pub courier_id: Uuid,
    /// Referrer credited per delivery
    pub referrer_id: Uuid,
    /// Fixed bonus amount per delivered shipment
    pub bonus_amount: Decimal,
}

/// Result of a settlement commit
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// The shipment was settled by this call
    Settled {
        /// Delivery timestamp written to the shipment
        delivered_at: DateTime<Utc>,
        /// Number of ledger entries created
        entry_count: usize,
    },
    /// The shipment was already Delivered; nothing was written
    AlreadySettled,
}

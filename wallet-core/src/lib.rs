//! SwiftShip Wallet Core
//!
//! Immutable ledger of signed money movements with cached balance snapshots.
//!
//! # Architecture
//!
//! - **Append-only ledger**: Entries are never modified after creation;
//!   withdrawal entries flip status exactly once
//! - **Single Writer**: One actor task serializes all mutations, so a
//!   settlement commits exactly once even under concurrent verification
//! - **Atomic commits**: Status flip, entries, and snapshots land in a
//!   single RocksDB WriteBatch
//! - **Self-healing balances**: Snapshots are a cache over the ledger and
//!   drift is reconciled from the entries, inline and by periodic sweep
//!
//! # Invariants
//!
//! - Entry amounts carry the sign their type dictates
//! - A delivered shipment settles at most once
//! - Σ(entries) is the source of truth for every balance

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{spawn_wallet_actor, WalletHandle, WalletMessage};
pub use config::Config;
pub use error::{Error, Result};
pub use reconcile::ReconcileReport;
pub use storage::Storage;
pub use types::{
    AttemptAdmission, AttemptKind, BalanceSnapshot, EntryStatus, EntryType, LedgerEntry, OwnerId, OwnerKind,
    PaymentMethod, ReferralLink, SettlementOutcome, Shipment, ShipmentStatus, StatusChange,
    VerificationCode,
};

use std::sync::Arc;

/// Top-level wallet: storage plus its single-writer actor.
#[derive(Clone)]
pub struct Wallet {
    handle: WalletHandle,
}

impl Wallet {
    /// Open storage at the configured path and spawn the writer actor.
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        let handle = spawn_wallet_actor(storage);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            "Wallet opened"
        );

        Ok(Self { handle })
    }

    /// Handle for issuing wallet operations.
    pub fn handle(&self) -> WalletHandle {
        self.handle.clone()
    }

    /// Stop the writer actor. Pending messages ahead of the shutdown
    /// marker are still processed.
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").finish_non_exhaustive()
    }
}

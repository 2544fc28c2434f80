//! Balance reconciliation
//!
//! The cached `BalanceSnapshot` is derived state; the ledger is the truth.
//! This module holds the one pure computation both reconciliation modes
//! share (inline-on-commit and the periodic sweep) and the healing step
//! that overwrites a drifted snapshot.
//!
//! # Invariants
//!
//! - Courier balance: Σ(amount) over Processed entries, excluding the
//!   withdrawal bookkeeping types
//! - Client balance: Σ(amount) over all entries
//! - The reconciler never creates or deletes ledger entries

use crate::{
    error::Result,
    metrics,
    storage::Storage,
    types::{BalanceSnapshot, EntryStatus, LedgerEntry, OwnerId, OwnerKind},
};
use chrono::Utc;
use rust_decimal::Decimal;

/// Drift below this threshold is treated as noise, not corrected
pub fn drift_epsilon() -> Decimal {
    // 0.01 currency units
    Decimal::new(1, 2)
}

/// Whether an entry counts toward its owner's cached balance
fn counts_toward_balance(kind: OwnerKind, entry: &LedgerEntry) -> bool {
    match kind {
        OwnerKind::Courier => {
            entry.status == EntryStatus::Processed
                && !entry.entry_type.is_withdrawal_bookkeeping()
        }
        // Client balances sum every entry regardless of status
        OwnerKind::Client => true,
    }
}

/// Pure balance computation from the ledger
pub fn computed_balance(kind: OwnerKind, entries: &[LedgerEntry]) -> Decimal {
    entries
        .iter()
        .filter(|e| counts_toward_balance(kind, e))
        .map(|e| e.amount)
        .sum()
}

/// Lifetime earnings: positive Processed entries (couriers only)
pub fn computed_earnings(kind: OwnerKind, entries: &[LedgerEntry]) -> Decimal {
    match kind {
        OwnerKind::Courier => entries
            .iter()
            .filter(|e| e.status == EntryStatus::Processed && e.amount > Decimal::ZERO)
            .map(|e| e.amount)
            .sum(),
        OwnerKind::Client => Decimal::ZERO,
    }
}

/// Build a fresh snapshot for an owner from a full entry list
///
/// Used by the settlement commit path, where the new entries are appended
/// to the stored ones before the write batch lands.
pub fn snapshot_from_entries(owner: OwnerId, entries: &[LedgerEntry]) -> BalanceSnapshot {
    BalanceSnapshot {
        owner,
        current_balance: computed_balance(owner.kind, entries),
        total_earnings: computed_earnings(owner.kind, entries),
        updated_at: Utc::now(),
    }
}

/// Outcome of one reconciliation pass over one owner
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Owner reconciled
    pub owner: OwnerId,
    /// Cached balance before the pass
    pub cached: Decimal,
    /// Balance recomputed from the ledger
    pub computed: Decimal,
    /// Whether the snapshot was overwritten
    pub corrected: bool,
}

/// Recompute one owner's balance and heal drift beyond the epsilon
///
/// Creates a zero-initialized snapshot for owners that never had one.
pub fn reconcile(storage: &Storage, owner: OwnerId) -> Result<ReconcileReport> {
    let entries = storage.get_owner_entries(owner)?;
    let computed = computed_balance(owner.kind, &entries);

    let cached_snapshot = storage
        .get_balance(owner)?
        .unwrap_or_else(|| BalanceSnapshot::zero(owner));
    let cached = cached_snapshot.current_balance;

    let drift = (cached - computed).abs();
    if drift <= drift_epsilon() {
        return Ok(ReconcileReport {
            owner,
            cached,
            computed,
            corrected: false,
        });
    }

    let healed = BalanceSnapshot {
        owner,
        current_balance: computed,
        total_earnings: computed_earnings(owner.kind, &entries),
        updated_at: Utc::now(),
    };
    storage.put_balance(&healed)?;
    metrics::RECONCILE_CORRECTIONS_TOTAL.inc();

    tracing::warn!(
        owner = %owner,
        before = %cached,
        after = %computed,
        drift = %drift,
        "Balance drift corrected"
    );

    Ok(ReconcileReport {
        owner,
        cached,
        computed,
        corrected: true,
    })
}

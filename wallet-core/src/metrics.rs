//! Prometheus metrics for the wallet core
//!
//! # Metrics
//!
//! - `wallet_entries_total` - Ledger entries appended
//! - `wallet_settlements_total` - Settlement commits by outcome
//! - `wallet_reconcile_corrections_total` - Snapshots healed by the reconciler
//! - `wallet_commit_duration_seconds` - Settlement commit latency

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Total ledger entries appended
    pub static ref ENTRIES_TOTAL: IntCounter = register_int_counter!(
        "wallet_entries_total",
        "Total ledger entries appended"
    )
    .unwrap();

    /// Settlement commits by outcome (settled / already_settled)
    pub static ref SETTLEMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "wallet_settlements_total",
        "Settlement commits by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Snapshots corrected by the reconciler
    pub static ref RECONCILE_CORRECTIONS_TOTAL: IntCounter = register_int_counter!(
        "wallet_reconcile_corrections_total",
        "Balance snapshots healed by the reconciler"
    )
    .unwrap();

    /// Settlement commit latency
    pub static ref COMMIT_DURATION: Histogram = register_histogram!(
        "wallet_commit_duration_seconds",
        "Settlement commit latency in seconds",
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    )
    .unwrap();
}

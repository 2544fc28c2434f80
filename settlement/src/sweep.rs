//! Periodic reconciliation sweep
//!
//! Background pass over every owner with a balance snapshot, recomputing
//! each balance from the ledger and healing drift. Catches anything a
//! code path skipped inline. Also prunes expired rate-limit attempt rows.

use crate::Result;
use chrono::{Duration as ChronoDuration, Utc};
use event_bus::{Event, EventPublisher, EventType, PartitionKey};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wallet_core::WalletHandle;

/// Reconciliation sweeper
pub struct ReconcileSweeper {
    handle: WalletHandle,

    /// Time between sweeps
    interval: Duration,

    /// Attempt rows older than this are pruned each sweep
    attempt_retention: ChronoDuration,

    /// Publisher for `wallet.corrected` events, if the bus is enabled
    publisher: Option<Arc<EventPublisher>>,
}

impl ReconcileSweeper {
    /// Create new sweeper
    pub fn new(handle: WalletHandle, interval: Duration, attempt_retention_hours: i64) -> Self {
        Self {
            handle,
            interval,
            attempt_retention: ChronoDuration::hours(attempt_retention_hours),
            publisher: None,
        }
    }

    /// Attach an event publisher for correction notifications
    pub fn with_publisher(mut self, publisher: Arc<EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Start the sweep loop
    pub async fn start(self: Arc<Self>) {
        info!(interval = ?self.interval, "Starting reconciliation sweeper");

        let mut ticker = tokio::time::interval(self.interval);
        // First tick fires immediately; skip it so startup isn't a sweep
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Reconciliation sweep failed");
            }
        }
    }

    /// One full sweep over all owners
    pub async fn run_once(&self) -> Result<usize> {
        let owners = self.handle.list_owners().await?;
        let mut corrections = 0usize;

        for owner in owners {
            match self.handle.reconcile(owner).await {
                Ok(report) if report.corrected => {
                    corrections += 1;
                    self.publish_correction(
                        &owner.to_string(),
                        &report.cached.to_string(),
                        &report.computed.to_string(),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // One bad owner must not starve the rest of the sweep
                    warn!(owner = %owner, error = %e, "Reconcile failed for owner");
                }
            }
        }

        let horizon = Utc::now() - self.attempt_retention;
        let pruned = self.handle.prune_attempts(horizon).await?;

        info!(corrections, pruned, "Reconciliation sweep complete");
        Ok(corrections)
    }

    fn publish_correction(&self, owner: &str, cached: &str, computed: &str) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };

        let event = Event::new(
            EventType::BalanceCorrected,
            PartitionKey::Owner(owner.to_string()),
            json!({
                "owner": owner,
                "cached": cached,
                "computed": computed,
                "corrected_at": Utc::now(),
            }),
        );

        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                tracing::error!(error = %e, "Failed to publish wallet.corrected");
            }
        });
    }
}

impl std::fmt::Debug for ReconcileSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileSweeper")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use uuid::Uuid;
    use wallet_core::{
        spawn_wallet_actor, AttemptKind, Config, EntryType, LedgerEntry, OwnerId, Storage,
    };

    async fn test_sweeper() -> (ReconcileSweeper, WalletHandle, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_wallet_actor(storage);
        let sweeper = ReconcileSweeper::new(handle.clone(), Duration::from_secs(3600), 24);
        (sweeper, handle, temp_dir)
    }

    #[tokio::test]
    async fn test_sweep_heals_corrupted_snapshot() {
        let (sweeper, handle, _temp) = test_sweeper().await;
        let owner = OwnerId::courier(Uuid::new_v4());

        let entry =
            LedgerEntry::new(owner, EntryType::Commission, Decimal::new(80, 0), None).unwrap();
        handle.append_entry(entry).await.unwrap();

        let mut snapshot = handle.get_balance(owner).await.unwrap().unwrap();
        snapshot.current_balance = Decimal::new(1, 0);
        handle.put_balance(snapshot).await.unwrap();

        let corrections = sweeper.run_once().await.unwrap();
        assert_eq!(corrections, 1);

        let healed = handle.get_balance(owner).await.unwrap().unwrap();
        assert_eq!(healed.current_balance, Decimal::new(80, 0));
    }

    #[tokio::test]
    async fn test_sweep_with_clean_ledger_makes_no_corrections() {
        let (sweeper, handle, _temp) = test_sweeper().await;
        let owner = OwnerId::client(Uuid::new_v4());

        let entry =
            LedgerEntry::new(owner, EntryType::Deposit, Decimal::new(10, 0), None).unwrap();
        handle.append_entry(entry).await.unwrap();

        let corrections = sweeper.run_once().await.unwrap();
        assert_eq!(corrections, 0);
    }

    #[tokio::test]
    async fn test_sweep_prunes_old_attempts() {
        let (sweeper, handle, _temp) = test_sweeper().await;
        let shipment_id = Uuid::new_v4();

        let stale = Utc::now() - ChronoDuration::hours(48);
        handle
            .record_attempt(shipment_id, AttemptKind::Issue, stale)
            .await
            .unwrap();
        handle
            .record_attempt(shipment_id, AttemptKind::Issue, Utc::now())
            .await
            .unwrap();

        sweeper.run_once().await.unwrap();

        let remaining = handle
            .attempts_since(shipment_id, AttemptKind::Issue, Utc::now() - ChronoDuration::days(30))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }
}

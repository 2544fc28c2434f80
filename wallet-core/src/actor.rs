//! Actor-based concurrency for the wallet
//!
//! This module implements the single-writer pattern using Tokio actors:
//! every mutation of shipments, codes, attempts, entries, and snapshots
//! flows through one actor task, so writes are totally ordered without
//! row locks. In particular, two concurrent settlement commits for the
//! same shipment execute in sequence and the second one hits the
//! Delivered guard instead of double-paying.
//!
//! ```text
//! Verification / Settlement / Sweep
//!          │
//!          │ WalletHandle (Clone)
//!          ▼
//!   mpsc::channel (bounded)
//!          │
//!          ▼
//!   WalletActor (single task) ──► Storage (RocksDB, WriteBatch)
//! ```

use crate::{
    metrics,
    reconcile::{self, ReconcileReport},
    types::{
        AttemptAdmission, AttemptKind, BalanceSnapshot, LedgerEntry, OwnerId, ReferralLink,
        SettlementOutcome, Shipment, ShipmentStatus, VerificationCode,
    },
    Error, Result, Storage,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the wallet actor
pub enum WalletMessage {
    /// Put shipment (back-office seeding)
    PutShipment {
        /// Shipment to store
        shipment: Shipment,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Get shipment
    GetShipment {
        /// Shipment id
        shipment_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Shipment>>,
    },

    /// Put referral link (back-office seeding)
    PutReferral {
        /// Link to store
        link: ReferralLink,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Get referral link for a courier
    GetReferral {
        /// Courier id
        courier_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Option<ReferralLink>>>,
    },

    /// Put (or replace) the outstanding code for a shipment
    PutCode {
        /// Code to store
        code: VerificationCode,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Get the outstanding code for a shipment
    GetCode {
        /// Shipment id
        shipment_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Option<VerificationCode>>>,
    },

    /// Record a rate-limit attempt row
    RecordAttempt {
        /// Shipment id
        shipment_id: Uuid,
        /// Attempt kind
        kind: AttemptKind,
        /// Attempt timestamp
        at: DateTime<Utc>,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Count attempts in the sliding window and record one if under the
    /// limit, as a single actor step
    TryRecordAttempt {
        /// Shipment id
        shipment_id: Uuid,
        /// Attempt kind
        kind: AttemptKind,
        /// Max attempts per window
        limit: usize,
        /// Window length in seconds
        window_secs: i64,
        /// Attempt timestamp
        at: DateTime<Utc>,
        /// Reply channel
        response: oneshot::Sender<Result<AttemptAdmission>>,
    },

    /// Attempt timestamps within a window, oldest first
    AttemptsSince {
        /// Shipment id
        shipment_id: Uuid,
        /// Attempt kind
        kind: AttemptKind,
        /// Window start
        since: DateTime<Utc>,
        /// Reply channel
        response: oneshot::Sender<Result<Vec<DateTime<Utc>>>>,
    },

    /// Prune attempt rows older than the horizon
    PruneAttempts {
        /// Retention horizon
        before: DateTime<Utc>,
        /// Reply channel
        response: oneshot::Sender<Result<usize>>,
    },

    /// Append a ledger entry and reconcile its owner inline
    AppendEntry {
        /// Entry to append
        entry: LedgerEntry,
        /// Reply channel
        response: oneshot::Sender<Result<Uuid>>,
    },

    /// All entries for one owner
    GetOwnerEntries {
        /// Owner
        owner: OwnerId,
        /// Reply channel
        response: oneshot::Sender<Result<Vec<LedgerEntry>>>,
    },

    /// Get balance snapshot
    GetBalance {
        /// Owner
        owner: OwnerId,
        /// Reply channel
        response: oneshot::Sender<Result<Option<BalanceSnapshot>>>,
    },

    /// Put balance snapshot (owner creation seeds a zero snapshot)
    PutBalance {
        /// Snapshot to store
        snapshot: BalanceSnapshot,
        /// Reply channel
        response: oneshot::Sender<Result<()>>,
    },

    /// All owners with a snapshot
    ListOwners {
        /// Reply channel
        response: oneshot::Sender<Result<Vec<OwnerId>>>,
    },

    /// Resolve a pending withdrawal and reconcile its owner inline
    ResolveWithdrawal {
        /// Withdrawal entry id
        entry_id: Uuid,
        /// Approve or decline
        approve: bool,
        /// Reply channel
        response: oneshot::Sender<Result<LedgerEntry>>,
    },

    /// Recompute one owner's balance and heal drift
    Reconcile {
        /// Owner
        owner: OwnerId,
        /// Reply channel
        response: oneshot::Sender<Result<ReconcileReport>>,
    },

    /// Commit one settlement atomically (guarded, exactly once)
    CommitSettlement {
        /// Shipment to settle
        shipment_id: Uuid,
        /// Delivery timestamp
        delivered_at: DateTime<Utc>,
        /// Verified code to persist alongside, if the trigger was a code
        code: Option<VerificationCode>,
        /// Ledger entries produced by the settlement plan
        entries: Vec<LedgerEntry>,
        /// Reply channel
        response: oneshot::Sender<Result<SettlementOutcome>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes wallet messages
pub struct WalletActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<WalletMessage>,
}

impl WalletActor {
    /// Create new actor
    pub fn new(storage: Arc<Storage>, mailbox: mpsc::Receiver<WalletMessage>) -> Self {
        Self { storage, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if matches!(msg, WalletMessage::Shutdown) {
                break;
            }
            self.handle_message(msg);
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: WalletMessage) {
        match msg {
            WalletMessage::PutShipment { shipment, response } => {
                let _ = response.send(self.storage.put_shipment(&shipment));
            }

            WalletMessage::GetShipment {
                shipment_id,
                response,
            } => {
                let _ = response.send(self.storage.get_shipment(shipment_id));
            }

            WalletMessage::PutReferral { link, response } => {
                let _ = response.send(self.storage.put_referral(&link));
            }

            WalletMessage::GetReferral {
                courier_id,
                response,
            } => {
                let _ = response.send(self.storage.get_referral(courier_id));
            }

            WalletMessage::PutCode { code, response } => {
                let _ = response.send(self.storage.put_code(&code));
            }

            WalletMessage::GetCode {
                shipment_id,
                response,
            } => {
                let _ = response.send(self.storage.get_code(shipment_id));
            }

            WalletMessage::RecordAttempt {
                shipment_id,
                kind,
                at,
                response,
            } => {
                let _ = response.send(self.storage.record_attempt(shipment_id, kind, at));
            }

            WalletMessage::TryRecordAttempt {
                shipment_id,
                kind,
                limit,
                window_secs,
                at,
                response,
            } => {
                let _ = response.send(self.handle_try_record_attempt(
                    shipment_id,
                    kind,
                    limit,
                    window_secs,
                    at,
                ));
            }

            WalletMessage::AttemptsSince {
                shipment_id,
                kind,
                since,
                response,
            } => {
                let _ = response.send(self.storage.attempts_since(shipment_id, kind, since));
            }

            WalletMessage::PruneAttempts { before, response } => {
                let _ = response.send(self.storage.prune_attempts(before));
            }

            WalletMessage::AppendEntry { entry, response } => {
                let _ = response.send(self.handle_append_entry(entry));
            }

            WalletMessage::GetOwnerEntries { owner, response } => {
                let _ = response.send(self.storage.get_owner_entries(owner));
            }

            WalletMessage::GetBalance { owner, response } => {
                let _ = response.send(self.storage.get_balance(owner));
            }

            WalletMessage::PutBalance { snapshot, response } => {
                let _ = response.send(self.storage.put_balance(&snapshot));
            }

            WalletMessage::ListOwners { response } => {
                let _ = response.send(self.storage.list_owners());
            }

            WalletMessage::ResolveWithdrawal {
                entry_id,
                approve,
                response,
            } => {
                let _ = response.send(self.handle_resolve_withdrawal(entry_id, approve));
            }

            WalletMessage::Reconcile { owner, response } => {
                let _ = response.send(reconcile::reconcile(&self.storage, owner));
            }

            WalletMessage::CommitSettlement {
                shipment_id,
                delivered_at,
                code,
                entries,
                response,
            } => {
                let _ = response.send(self.handle_commit_settlement(
                    shipment_id,
                    delivered_at,
                    code,
                    entries,
                ));
            }

            WalletMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    /// Atomic sliding-window admission
    ///
    /// Count and record run in one actor step: racing callers serialize
    /// through the mailbox, so the window limit is a hard bound.
    fn handle_try_record_attempt(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        limit: usize,
        window_secs: i64,
        at: DateTime<Utc>,
    ) -> Result<AttemptAdmission> {
        let since = at - Duration::seconds(window_secs);
        let attempts = self.storage.attempts_since(shipment_id, kind, since)?;

        if attempts.len() < limit {
            self.storage.record_attempt(shipment_id, kind, at)?;
            return Ok(AttemptAdmission::Admitted);
        }

        // The limit frees up when the oldest of the last `limit` attempts
        // leaves the window
        let blocking = attempts[attempts.len() - limit];
        let retry_after_secs = (blocking + Duration::seconds(window_secs) - at)
            .num_seconds()
            .max(1) as u64;

        Ok(AttemptAdmission::Limited { retry_after_secs })
    }

    fn handle_append_entry(&self, entry: LedgerEntry) -> Result<Uuid> {
        let entry_id = entry.entry_id;
        let owner = entry.owner;

        self.storage.append_entry(&entry)?;
        metrics::ENTRIES_TOTAL.inc();

        // Inline reconciliation keeps the snapshot in step with the ledger
        reconcile::reconcile(&self.storage, owner)?;

        Ok(entry_id)
    }

    fn handle_resolve_withdrawal(&self, entry_id: Uuid, approve: bool) -> Result<LedgerEntry> {
        let entry = self.storage.resolve_withdrawal(entry_id, approve)?;
        reconcile::reconcile(&self.storage, entry.owner)?;
        Ok(entry)
    }

    /// The exactly-once settlement commit
    ///
    /// The Delivered re-check happens here, inside the single writer, so a
    /// second commit racing for the same shipment is a clean no-op.
    fn handle_commit_settlement(
        &self,
        shipment_id: Uuid,
        delivered_at: DateTime<Utc>,
        code: Option<VerificationCode>,
        entries: Vec<LedgerEntry>,
    ) -> Result<SettlementOutcome> {
        let start = Instant::now();

        let mut shipment = self.storage.get_shipment(shipment_id)?;

        // Idempotency guard
        if shipment.status == ShipmentStatus::Delivered {
            metrics::SETTLEMENTS_TOTAL
                .with_label_values(&["already_settled"])
                .inc();
            tracing::debug!(shipment_id = %shipment_id, "Settlement replay ignored");
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if shipment.status == ShipmentStatus::Failed {
            return Err(Error::InvalidTransition(format!(
                "Shipment {} is Failed and cannot settle",
                shipment_id
            )));
        }

        shipment.record_status(ShipmentStatus::Delivered, delivered_at);

        // Inline reconciliation: snapshots computed from stored entries plus
        // the new ones, written in the same batch as the entries themselves.
        let mut owners: Vec<OwnerId> = Vec::new();
        for entry in &entries {
            if !owners.contains(&entry.owner) {
                owners.push(entry.owner);
            }
        }

        let mut snapshots = Vec::with_capacity(owners.len());
        for owner in owners {
            let mut all = self.storage.get_owner_entries(owner)?;
            all.extend(entries.iter().filter(|e| e.owner == owner).cloned());
            snapshots.push(reconcile::snapshot_from_entries(owner, &all));
        }

        self.storage
            .commit_settlement(&shipment, code.as_ref(), &entries, &snapshots)?;

        metrics::ENTRIES_TOTAL.inc_by(entries.len() as u64);
        metrics::SETTLEMENTS_TOTAL
            .with_label_values(&["settled"])
            .inc();
        metrics::COMMIT_DURATION.observe(start.elapsed().as_secs_f64());

        Ok(SettlementOutcome::Settled {
            delivered_at,
            entry_count: entries.len(),
        })
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct WalletHandle {
    sender: mpsc::Sender<WalletMessage>,
}

impl WalletHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<WalletMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> WalletMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Put shipment
    pub async fn put_shipment(&self, shipment: Shipment) -> Result<()> {
        self.request(|response| WalletMessage::PutShipment { shipment, response })
            .await
    }

    /// Get shipment
    pub async fn get_shipment(&self, shipment_id: Uuid) -> Result<Shipment> {
        self.request(|response| WalletMessage::GetShipment {
            shipment_id,
            response,
        })
        .await
    }

    /// Put referral link
    pub async fn put_referral(&self, link: ReferralLink) -> Result<()> {
        self.request(|response| WalletMessage::PutReferral { link, response })
            .await
    }

    /// Get referral link for a courier
    pub async fn get_referral(&self, courier_id: Uuid) -> Result<Option<ReferralLink>> {
        self.request(|response| WalletMessage::GetReferral {
            courier_id,
            response,
        })
        .await
    }

    /// Put (or replace) the outstanding code for a shipment
    pub async fn put_code(&self, code: VerificationCode) -> Result<()> {
        self.request(|response| WalletMessage::PutCode { code, response })
            .await
    }

    /// Get the outstanding code for a shipment
    pub async fn get_code(&self, shipment_id: Uuid) -> Result<Option<VerificationCode>> {
        self.request(|response| WalletMessage::GetCode {
            shipment_id,
            response,
        })
        .await
    }

    /// Record a rate-limit attempt
    pub async fn record_attempt(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.request(|response| WalletMessage::RecordAttempt {
            shipment_id,
            kind,
            at,
            response,
        })
        .await
    }

    /// Atomically count attempts in the window and record one if admitted
    pub async fn try_record_attempt(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        limit: usize,
        window_secs: i64,
        at: DateTime<Utc>,
    ) -> Result<AttemptAdmission> {
        self.request(|response| WalletMessage::TryRecordAttempt {
            shipment_id,
            kind,
            limit,
            window_secs,
            at,
            response,
        })
        .await
    }

    /// Attempt timestamps within a window, oldest first
    pub async fn attempts_since(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        self.request(|response| WalletMessage::AttemptsSince {
            shipment_id,
            kind,
            since,
            response,
        })
        .await
    }

    /// Prune attempt rows older than the horizon
    pub async fn prune_attempts(&self, before: DateTime<Utc>) -> Result<usize> {
        self.request(|response| WalletMessage::PruneAttempts { before, response })
            .await
    }

    /// Append a ledger entry (reconciles the owner inline)
    pub async fn append_entry(&self, entry: LedgerEntry) -> Result<Uuid> {
        self.request(|response| WalletMessage::AppendEntry { entry, response })
            .await
    }

    /// All entries for one owner
    pub async fn get_owner_entries(&self, owner: OwnerId) -> Result<Vec<LedgerEntry>> {
        self.request(|response| WalletMessage::GetOwnerEntries { owner, response })
            .await
    }

    /// Get balance snapshot
    pub async fn get_balance(&self, owner: OwnerId) -> Result<Option<BalanceSnapshot>> {
        self.request(|response| WalletMessage::GetBalance { owner, response })
            .await
    }

    /// Put balance snapshot (owner creation)
    pub async fn put_balance(&self, snapshot: BalanceSnapshot) -> Result<()> {
        self.request(|response| WalletMessage::PutBalance { snapshot, response })
            .await
    }

    /// All owners with a snapshot
    pub async fn list_owners(&self) -> Result<Vec<OwnerId>> {
        self.request(|response| WalletMessage::ListOwners { response })
            .await
    }

    /// Resolve a pending withdrawal (reconciles the owner inline)
    pub async fn resolve_withdrawal(&self, entry_id: Uuid, approve: bool) -> Result<LedgerEntry> {
        self.request(|response| WalletMessage::ResolveWithdrawal {
            entry_id,
            approve,
            response,
        })
        .await
    }

    /// Recompute one owner's balance and heal drift
    pub async fn reconcile(&self, owner: OwnerId) -> Result<ReconcileReport> {
        self.request(|response| WalletMessage::Reconcile { owner, response })
            .await
    }

    /// Commit one settlement atomically
    pub async fn commit_settlement(
        &self,
        shipment_id: Uuid,
        delivered_at: DateTime<Utc>,
        code: Option<VerificationCode>,
        entries: Vec<LedgerEntry>,
    ) -> Result<SettlementOutcome> {
        self.request(|response| WalletMessage::CommitSettlement {
            shipment_id,
            delivered_at,
            code,
            entries,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WalletMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the wallet actor
pub fn spawn_wallet_actor(storage: Arc<Storage>) -> WalletHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = WalletActor::new(storage, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    WalletHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryType, PaymentMethod};
    use crate::Config;
    use rust_decimal::Decimal;

    fn test_shipment() -> Shipment {
        Shipment {
            shipment_id: Uuid::new_v4(),
            status: ShipmentStatus::OutForDelivery,
            status_history: vec![],
            courier_id: Some(Uuid::new_v4()),
            client_id: Uuid::new_v4(),
            recipient_phone: "+20100000000".to_string(),
            payment_method: PaymentMethod::CashOnDelivery,
            package_value: Decimal::new(1000, 0),
            client_flat_rate_fee: Decimal::new(75, 0),
            courier_commission: Decimal::new(50, 0),
            amount_to_collect: Decimal::ZERO,
        }
    }

    async fn spawn_test_actor() -> (WalletHandle, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        (spawn_wallet_actor(storage), temp_dir)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _temp) = spawn_test_actor().await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_entry_reconciles_inline() {
        let (handle, _temp) = spawn_test_actor().await;
        let owner = OwnerId::courier(Uuid::new_v4());

        let entry =
            LedgerEntry::new(owner, EntryType::Commission, Decimal::new(50, 0), None).unwrap();
        handle.append_entry(entry).await.unwrap();

        let snapshot = handle.get_balance(owner).await.unwrap().unwrap();
        assert_eq!(snapshot.current_balance, Decimal::new(50, 0));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_settlement_guard() {
        let (handle, _temp) = spawn_test_actor().await;
        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier = OwnerId::courier(shipment.courier_id.unwrap());

        handle.put_shipment(shipment).await.unwrap();

        let now = Utc::now();
        let entries = vec![LedgerEntry::new(
            courier,
            EntryType::Commission,
            Decimal::new(50, 0),
            Some(shipment_id),
        )
        .unwrap()];

        let first = handle
            .commit_settlement(shipment_id, now, None, entries.clone())
            .await
            .unwrap();
        assert!(matches!(first, SettlementOutcome::Settled { entry_count: 1, .. }));

        // Replay is a no-op
        let second = handle
            .commit_settlement(shipment_id, now, None, entries)
            .await
            .unwrap();
        assert_eq!(second, SettlementOutcome::AlreadySettled);

        // Exactly one commission entry
        let courier_entries = handle.get_owner_entries(courier).await.unwrap();
        assert_eq!(courier_entries.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_commits_settle_once() {
        let (handle, _temp) = spawn_test_actor().await;
        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier = OwnerId::courier(shipment.courier_id.unwrap());

        handle.put_shipment(shipment).await.unwrap();

        let make_entries = || {
            vec![LedgerEntry::new(
                courier,
                EntryType::Commission,
                Decimal::new(50, 0),
                Some(shipment_id),
            )
            .unwrap()]
        };

        let now = Utc::now();
        let h1 = handle.clone();
        let h2 = handle.clone();
        let e1 = make_entries();
        let e2 = make_entries();

        let (r1, r2) = tokio::join!(
            h1.commit_settlement(shipment_id, now, None, e1),
            h2.commit_settlement(shipment_id, now, None, e2),
        );

        let outcomes = [r1.unwrap(), r2.unwrap()];
        let settled = outcomes
            .iter()
            .filter(|o| matches!(o, SettlementOutcome::Settled { .. }))
            .count();
        assert_eq!(settled, 1);

        let courier_entries = handle.get_owner_entries(courier).await.unwrap();
        assert_eq!(courier_entries.len(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_admissions_respect_limit() {
        let (handle, _temp) = spawn_test_actor().await;
        let shipment_id = Uuid::new_v4();

        // Saturate the window up to one below the limit
        let now = Utc::now();
        for _ in 0..2 {
            let verdict = handle
                .try_record_attempt(shipment_id, AttemptKind::Issue, 3, 60, now)
                .await
                .unwrap();
            assert_eq!(verdict, AttemptAdmission::Admitted);
        }

        // Two racing callers contend for the single remaining slot
        let h1 = handle.clone();
        let h2 = handle.clone();
        let (r1, r2) = tokio::join!(
            h1.try_record_attempt(shipment_id, AttemptKind::Issue, 3, 60, now),
            h2.try_record_attempt(shipment_id, AttemptKind::Issue, 3, 60, now),
        );

        let verdicts = [r1.unwrap(), r2.unwrap()];
        let admitted = verdicts
            .iter()
            .filter(|v| matches!(v, AttemptAdmission::Admitted))
            .count();
        assert_eq!(admitted, 1);

        // Exactly three rows on disk
        let since = now - Duration::seconds(60);
        let attempts = handle
            .attempts_since(shipment_id, AttemptKind::Issue, since)
            .await
            .unwrap();
        assert_eq!(attempts.len(), 3);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_admission_retry_after_tracks_oldest_blocker() {
        let (handle, _temp) = spawn_test_actor().await;
        let shipment_id = Uuid::new_v4();

        let now = Utc::now();
        // Oldest attempt 50s into a 60s window: the slot frees in ~10s
        for age in [50, 20, 5] {
            handle
                .try_record_attempt(
                    shipment_id,
                    AttemptKind::Validate,
                    3,
                    60,
                    now - Duration::seconds(age),
                )
                .await
                .unwrap();
        }

        let verdict = handle
            .try_record_attempt(shipment_id, AttemptKind::Validate, 3, 60, now)
            .await
            .unwrap();
        match verdict {
            AttemptAdmission::Limited { retry_after_secs } => {
                assert!(retry_after_secs >= 9 && retry_after_secs <= 11);
            }
            other => panic!("expected Limited, got {:?}", other),
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_shipment_cannot_settle() {
        let (handle, _temp) = spawn_test_actor().await;
        let mut shipment = test_shipment();
        shipment.status = ShipmentStatus::Failed;
        let shipment_id = shipment.shipment_id;

        handle.put_shipment(shipment).await.unwrap();

        let result = handle
            .commit_settlement(shipment_id, Utc::now(), None, vec![])
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));

        handle.shutdown().await.unwrap();
    }
}

//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `shipments` - Shipment slice owned by the engine (key: shipment_id)
//! - `codes` - Outstanding verification codes (key: shipment_id)
//! - `attempts` - Append-only rate-limit rows (key: kind || shipment_id || ts || nonce)
//! - `entries` - Append-only ledger entries (key: entry_id)
//! - `balances` - Cached balance snapshots (key: owner kind || owner id)
//! - `referrals` - Courier-to-referrer links (key: courier_id)
//! - `indices` - Owner-to-entry index for per-owner scans
//!
//! Keying `codes` by shipment id is what enforces the at-most-one
//! outstanding code invariant: issuing overwrites the previous row.

use crate::{
    error::{Error, Result},
    types::{
        AttemptKind, BalanceSnapshot, LedgerEntry, OwnerId, OwnerKind, ReferralLink, Shipment,
        VerificationCode,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_SHIPMENTS: &str = "shipments";
const CF_CODES: &str = "codes";
const CF_ATTEMPTS: &str = "attempts";
const CF_ENTRIES: &str = "entries";
const CF_BALANCES: &str = "balances";
const CF_REFERRALS: &str = "referrals";
const CF_INDICES: &str = "indices";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy entry/attempt workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SHIPMENTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_CODES, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_ATTEMPTS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_REFERRALS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Shipment operations

    /// Put shipment (seeding and settlement commits)
    pub fn put_shipment(&self, shipment: &Shipment) -> Result<()> {
        let cf = self.cf_handle(CF_SHIPMENTS)?;
        let value = bincode::serialize(shipment)?;
        self.db
            .put_cf(&cf, shipment.shipment_id.as_bytes(), &value)?;
        Ok(())
    }

    /// Get shipment by id
    pub fn get_shipment(&self, shipment_id: Uuid) -> Result<Shipment> {
        let cf = self.cf_handle(CF_SHIPMENTS)?;
        let value = self
            .db
            .get_cf(&cf, shipment_id.as_bytes())?
            .ok_or_else(|| Error::ShipmentNotFound(shipment_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    // Referral operations

    /// Put referral link (seeded by the back office)
    pub fn put_referral(&self, link: &ReferralLink) -> Result<()> {
        let cf = self.cf_handle(CF_REFERRALS)?;
        let value = bincode::serialize(link)?;
        self.db.put_cf(&cf, link.courier_id.as_bytes(), &value)?;
        Ok(())
    }

    /// Get referral link for a courier, if one exists
    pub fn get_referral(&self, courier_id: Uuid) -> Result<Option<ReferralLink>> {
        let cf = self.cf_handle(CF_REFERRALS)?;
        match self.db.get_cf(&cf, courier_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Verification code operations

    /// Put (or replace) the outstanding code for a shipment
    pub fn put_code(&self, code: &VerificationCode) -> Result<()> {
        let cf = self.cf_handle(CF_CODES)?;
        let value = bincode::serialize(code)?;
        self.db.put_cf(&cf, code.shipment_id.as_bytes(), &value)?;

        tracing::debug!(
            shipment_id = %code.shipment_id,
            expires_at = %code.expires_at,
            "Verification code stored"
        );

        Ok(())
    }

    /// Get the outstanding code for a shipment, if any
    pub fn get_code(&self, shipment_id: Uuid) -> Result<Option<VerificationCode>> {
        let cf = self.cf_handle(CF_CODES)?;
        match self.db.get_cf(&cf, shipment_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Attempt operations (durable rate-limit rows)

    /// Record one issuance or validation attempt
    pub fn record_attempt(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;
        let key = Self::attempt_key(shipment_id, kind, at);
        self.db.put_cf(&cf, &key, b"")?;
        Ok(())
    }

    /// Attempt timestamps within the window, oldest first
    pub fn attempts_since(
        &self,
        shipment_id: Uuid,
        kind: AttemptKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;
        let prefix = Self::attempt_prefix(shipment_id, kind);
        let since_nanos = since.timestamp_nanos_opt().unwrap_or(0);

        let mut timestamps = Vec::new();
        for item in self.db.prefix_iterator_cf(&cf, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() < 25 {
                continue;
            }
            let ts_bytes: [u8; 8] = key[17..25].try_into().expect("slice length checked");
            let ts_nanos = i64::from_be_bytes(ts_bytes);
            if ts_nanos >= since_nanos {
                timestamps.push(DateTime::from_timestamp_nanos(ts_nanos));
            }
        }

        Ok(timestamps)
    }

    /// Delete attempt rows older than the retention horizon
    ///
    /// Not correctness-critical; windows only look backwards a few minutes.
    pub fn prune_attempts(&self, before: DateTime<Utc>) -> Result<usize> {
        let cf = self.cf_handle(CF_ATTEMPTS)?;
        let before_nanos = before.timestamp_nanos_opt().unwrap_or(0);

        let mut batch = WriteBatch::default();
        let mut pruned = 0usize;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() < 25 {
                continue;
            }
            let ts_bytes: [u8; 8] = key[17..25].try_into().expect("slice length checked");
            if i64::from_be_bytes(ts_bytes) < before_nanos {
                batch.delete_cf(&cf, &key);
                pruned += 1;
            }
        }
        self.db.write(batch)?;

        Ok(pruned)
    }

    // Ledger entry operations

    /// Append a single entry with its owner index (atomic)
    pub fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_entry(&mut batch, entry)?;
        self.db.write(batch)?;

        tracing::debug!(
            entry_id = %entry.entry_id,
            owner = %entry.owner,
            entry_type = %entry.entry_type,
            amount = %entry.amount,
            "Ledger entry appended"
        );

        Ok(())
    }

    /// Get entry by id
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = self
            .db
            .get_cf(&cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All entries for one owner, in entry-id (time) order
    pub fn get_owner_entries(&self, owner: OwnerId) -> Result<Vec<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = owner.key_bytes();

        let mut entries = Vec::new();
        for item in self.db.prefix_iterator_cf(&cf_indices, prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() >= 33 {
                let entry_id_bytes: [u8; 16] = key[17..33].try_into().expect("length checked");
                entries.push(self.get_entry(Uuid::from_bytes(entry_id_bytes))?);
            }
        }

        Ok(entries)
    }

    /// Resolve a pending withdrawal request exactly once
    pub fn resolve_withdrawal(&self, entry_id: Uuid, approve: bool) -> Result<LedgerEntry> {
        use crate::types::{EntryStatus, EntryType};

        let mut entry = self.get_entry(entry_id)?;

        if entry.entry_type != EntryType::WithdrawalRequest {
            return Err(Error::InvalidTransition(format!(
                "Entry {} is {}, not a withdrawal request",
                entry_id, entry.entry_type
            )));
        }
        if entry.status != EntryStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "Withdrawal {} already resolved ({:?})",
                entry_id, entry.status
            )));
        }

        entry.status = if approve {
            EntryStatus::Processed
        } else {
            EntryStatus::Declined
        };

        let cf = self.cf_handle(CF_ENTRIES)?;
        let value = bincode::serialize(&entry)?;
        self.db.put_cf(&cf, entry.entry_id.as_bytes(), &value)?;

        tracing::info!(
            entry_id = %entry_id,
            owner = %entry.owner,
            approved = approve,
            "Withdrawal resolved"
        );

        Ok(entry)
    }

    // Balance snapshot operations

    /// Put balance snapshot (reconciler only)
    pub fn put_balance(&self, snapshot: &BalanceSnapshot) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let value = bincode::serialize(snapshot)?;
        self.db.put_cf(&cf, snapshot.owner.key_bytes(), &value)?;
        Ok(())
    }

    /// Get balance snapshot, if the owner has one
    pub fn get_balance(&self, owner: OwnerId) -> Result<Option<BalanceSnapshot>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(&cf, owner.key_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All owners with a balance snapshot (sweep enumeration)
    pub fn list_owners(&self) -> Result<Vec<OwnerId>> {
        let cf = self.cf_handle(CF_BALANCES)?;

        let mut owners = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.len() != 17 {
                continue;
            }
            let kind = OwnerKind::from_byte(key[0])
                .ok_or_else(|| Error::Storage(format!("Bad owner kind byte {}", key[0])))?;
            let id_bytes: [u8; 16] = key[1..17].try_into().expect("length checked");
            owners.push(OwnerId {
                kind,
                id: Uuid::from_bytes(id_bytes),
            });
        }

        Ok(owners)
    }

    // Settlement commit (atomic)

    /// Commit one settlement as a single write batch
    ///
    /// Covers the Delivered shipment, the verified code, every ledger entry
    /// with its owner index, and the recomputed balance snapshots. Either
    /// all of it lands or none of it does.
    pub fn commit_settlement(
        &self,
        shipment: &Shipment,
        code: Option<&VerificationCode>,
        entries: &[LedgerEntry],
        snapshots: &[BalanceSnapshot],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_shipments = self.cf_handle(CF_SHIPMENTS)?;
        batch.put_cf(
            &cf_shipments,
            shipment.shipment_id.as_bytes(),
            bincode::serialize(shipment)?,
        );

        if let Some(code) = code {
            let cf_codes = self.cf_handle(CF_CODES)?;
            batch.put_cf(
                &cf_codes,
                code.shipment_id.as_bytes(),
                bincode::serialize(code)?,
            );
        }

        for entry in entries {
            self.batch_entry(&mut batch, entry)?;
        }

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for snapshot in snapshots {
            batch.put_cf(
                &cf_balances,
                snapshot.owner.key_bytes(),
                bincode::serialize(snapshot)?,
            );
        }

        self.db.write(batch)?;

        tracing::info!(
            shipment_id = %shipment.shipment_id,
            entries = entries.len(),
            snapshots = snapshots.len(),
            "Settlement committed"
        );

        Ok(())
    }

    // Key helpers

    fn batch_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(
            &cf_entries,
            entry.entry_id.as_bytes(),
            bincode::serialize(entry)?,
        );

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            &cf_indices,
            Self::index_key_owner_entry(entry.owner, entry.entry_id),
            [],
        );

        Ok(())
    }

    fn index_key_owner_entry(owner: OwnerId, entry_id: Uuid) -> Vec<u8> {
        let mut key = owner.key_bytes().to_vec();
        key.extend_from_slice(entry_id.as_bytes());
        key
    }

    fn attempt_prefix(shipment_id: Uuid, kind: AttemptKind) -> [u8; 17] {
        let mut prefix = [0u8; 17];
        prefix[0] = kind.as_byte();
        prefix[1..].copy_from_slice(shipment_id.as_bytes());
        prefix
    }

    fn attempt_key(shipment_id: Uuid, kind: AttemptKind, at: DateTime<Utc>) -> Vec<u8> {
        let mut key = Self::attempt_prefix(shipment_id, kind).to_vec();
        key.extend_from_slice(&at.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        // Nonce keeps same-nanosecond attempts from colliding
        key.extend_from_slice(&Uuid::new_v4().as_bytes()[..4]);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryType, PaymentMethod, ShipmentStatus};
    use chrono::Duration;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

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

    #[test]
    fn test_shipment_roundtrip() {
        let (storage, _temp) = test_storage();
        let shipment = test_shipment();

        storage.put_shipment(&shipment).unwrap();
        let retrieved = storage.get_shipment(shipment.shipment_id).unwrap();
        assert_eq!(retrieved.shipment_id, shipment.shipment_id);
        assert_eq!(retrieved.status, ShipmentStatus::OutForDelivery);

        let missing = storage.get_shipment(Uuid::new_v4());
        assert!(matches!(missing, Err(Error::ShipmentNotFound(_))));
    }

    #[test]
    fn test_code_overwrite_keeps_one_live_code() {
        let (storage, _temp) = test_storage();
        let shipment_id = Uuid::new_v4();
        let now = Utc::now();

        let first = VerificationCode::new(shipment_id, "111111", now, 600);
        storage.put_code(&first).unwrap();

        let second = VerificationCode::new(shipment_id, "222222", now, 600);
        storage.put_code(&second).unwrap();

        let stored = storage.get_code(shipment_id).unwrap().unwrap();
        assert_eq!(stored.code, "222222");
    }

    #[test]
    fn test_attempt_window_counting() {
        let (storage, _temp) = test_storage();
        let shipment_id = Uuid::new_v4();
        let now = Utc::now();

        storage
            .record_attempt(shipment_id, AttemptKind::Issue, now - Duration::seconds(120))
            .unwrap();
        storage
            .record_attempt(shipment_id, AttemptKind::Issue, now - Duration::seconds(30))
            .unwrap();
        storage
            .record_attempt(shipment_id, AttemptKind::Issue, now)
            .unwrap();
        // Different kind must not leak into the count
        storage
            .record_attempt(shipment_id, AttemptKind::Validate, now)
            .unwrap();

        let in_window = storage
            .attempts_since(shipment_id, AttemptKind::Issue, now - Duration::seconds(60))
            .unwrap();
        assert_eq!(in_window.len(), 2);
        // Oldest first
        assert!(in_window[0] < in_window[1]);

        let validate = storage
            .attempts_since(shipment_id, AttemptKind::Validate, now - Duration::seconds(60))
            .unwrap();
        assert_eq!(validate.len(), 1);
    }

    #[test]
    fn test_prune_attempts() {
        let (storage, _temp) = test_storage();
        let shipment_id = Uuid::new_v4();
        let now = Utc::now();

        storage
            .record_attempt(shipment_id, AttemptKind::Issue, now - Duration::hours(2))
            .unwrap();
        storage
            .record_attempt(shipment_id, AttemptKind::Issue, now)
            .unwrap();

        let pruned = storage.prune_attempts(now - Duration::hours(1)).unwrap();
        assert_eq!(pruned, 1);

        let remaining = storage
            .attempts_since(shipment_id, AttemptKind::Issue, now - Duration::hours(3))
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_owner_entry_index() {
        let (storage, _temp) = test_storage();
        let owner = OwnerId::courier(Uuid::new_v4());
        let other = OwnerId::courier(Uuid::new_v4());

        for _ in 0..3 {
            let entry =
                LedgerEntry::new(owner, EntryType::Commission, Decimal::new(50, 0), None).unwrap();
            storage.append_entry(&entry).unwrap();
        }
        let stray =
            LedgerEntry::new(other, EntryType::Commission, Decimal::new(10, 0), None).unwrap();
        storage.append_entry(&stray).unwrap();

        let entries = storage.get_owner_entries(owner).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.owner == owner));
    }

    #[test]
    fn test_resolve_withdrawal_exactly_once() {
        use crate::types::EntryStatus;

        let (storage, _temp) = test_storage();
        let owner = OwnerId::courier(Uuid::new_v4());

        let withdrawal = LedgerEntry::new(
            owner,
            EntryType::WithdrawalRequest,
            Decimal::new(-200, 0),
            None,
        )
        .unwrap();
        storage.append_entry(&withdrawal).unwrap();

        let resolved = storage.resolve_withdrawal(withdrawal.entry_id, false).unwrap();
        assert_eq!(resolved.status, EntryStatus::Declined);

        // Second resolution must fail
        let again = storage.resolve_withdrawal(withdrawal.entry_id, true);
        assert!(matches!(again, Err(Error::InvalidTransition(_))));

        // Non-withdrawal entries cannot be resolved
        let commission =
            LedgerEntry::new(owner, EntryType::Commission, Decimal::new(50, 0), None).unwrap();
        storage.append_entry(&commission).unwrap();
        assert!(storage.resolve_withdrawal(commission.entry_id, true).is_err());
    }

    #[test]
    fn test_commit_settlement_atomic() {
        let (storage, _temp) = test_storage();
        let mut shipment = test_shipment();
        let courier = OwnerId::courier(shipment.courier_id.unwrap());
        let client = OwnerId::client(shipment.client_id);

        let now = Utc::now();
        shipment.record_status(ShipmentStatus::Delivered, now);

        let code = VerificationCode::new(shipment.shipment_id, "123456", now, 600)
            .into_verified(now);

        let entries = vec![
            LedgerEntry::new(
                courier,
                EntryType::Commission,
                Decimal::new(50, 0),
                Some(shipment.shipment_id),
            )
            .unwrap(),
            LedgerEntry::new(
                client,
                EntryType::Deposit,
                Decimal::new(1000, 0),
                Some(shipment.shipment_id),
            )
            .unwrap(),
        ];

        let snapshots = vec![
            BalanceSnapshot {
                owner: courier,
                current_balance: Decimal::new(50, 0),
                total_earnings: Decimal::new(50, 0),
                updated_at: now,
            },
            BalanceSnapshot {
                owner: client,
                current_balance: Decimal::new(1000, 0),
                total_earnings: Decimal::ZERO,
                updated_at: now,
            },
        ];

        storage
            .commit_settlement(&shipment, Some(&code), &entries, &snapshots)
            .unwrap();

        assert_eq!(
            storage.get_shipment(shipment.shipment_id).unwrap().status,
            ShipmentStatus::Delivered
        );
        assert!(storage.get_code(shipment.shipment_id).unwrap().unwrap().verified);
        assert_eq!(storage.get_owner_entries(courier).unwrap().len(), 1);
        assert_eq!(storage.get_owner_entries(client).unwrap().len(), 1);
        assert_eq!(
            storage.get_balance(courier).unwrap().unwrap().current_balance,
            Decimal::new(50, 0)
        );
    }

    #[test]
    fn test_list_owners() {
        let (storage, _temp) = test_storage();
        let courier = OwnerId::courier(Uuid::new_v4());
        let client = OwnerId::client(Uuid::new_v4());

        storage.put_balance(&BalanceSnapshot::zero(courier)).unwrap();
        storage.put_balance(&BalanceSnapshot::zero(client)).unwrap();

        let owners = storage.list_owners().unwrap();
        assert_eq!(owners.len(), 2);
        assert!(owners.contains(&courier));
        assert!(owners.contains(&client));
    }
}

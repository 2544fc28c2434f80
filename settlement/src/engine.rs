//! Main settlement engine
//!
//! Orchestrates the exactly-once conversion of a verified delivery into
//! ledger entries, balance snapshots, and the Delivered status flip.

use crate::{
    plan::{build_plan, SettlementPlan},
    Result,
};
use chrono::Utc;
use event_bus::{Event, EventPublisher, EventType, PartitionKey};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wallet_core::{
    OwnerId, SettlementOutcome, Shipment, ShipmentStatus, VerificationCode, WalletHandle,
};

/// Settlement engine
#[derive(Clone)]
pub struct SettlementEngine {
    /// Wallet actor handle (the single writer)
    handle: WalletHandle,

    /// Event publisher; absent in tests and when the bus is disabled
    publisher: Option<Arc<EventPublisher>>,
}

impl SettlementEngine {
    /// Create new settlement engine
    pub fn new(handle: WalletHandle) -> Self {
        Self {
            handle,
            publisher: None,
        }
    }

    /// Attach an event publisher for `delivery.settled` notifications
    pub fn with_publisher(mut self, publisher: Arc<EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Settle one shipment, exactly once.
    ///
    /// `code` is the verified code that triggered the settlement; it is
    /// persisted in the same batch as the entries. Replays return
    /// `AlreadySettled` without touching the ledger.
    pub async fn settle(
        &self,
        shipment_id: Uuid,
        code: Option<VerificationCode>,
    ) -> Result<SettlementOutcome> {
        let shipment = self.handle.get_shipment(shipment_id).await?;

        // Cheap pre-check; the authoritative guard runs inside the actor
        if shipment.status == ShipmentStatus::Delivered {
            tracing::debug!(shipment_id = %shipment_id, "Already settled");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let delivered_at = Utc::now();
        let plan = self.build_shipment_plan(&shipment, delivered_at).await?;
        let entry_count = plan.entries.len();

        tracing::info!(
            shipment_id = %shipment_id,
            entries = entry_count,
            method = ?shipment.payment_method,
            "Committing settlement"
        );

        let outcome = self
            .handle
            .commit_settlement(shipment_id, plan.delivered_at, code, plan.entries)
            .await?;

        if let SettlementOutcome::Settled { .. } = &outcome {
            self.publish_settled(shipment_id, entry_count);
        }

        Ok(outcome)
    }

    /// Resolve collaborators and build the plan
    async fn build_shipment_plan(
        &self,
        shipment: &Shipment,
        delivered_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<SettlementPlan> {
        let courier_resolvable = match shipment.courier_id {
            Some(courier_id) => self
                .handle
                .get_balance(OwnerId::courier(courier_id))
                .await?
                .is_some(),
            None => false,
        };

        let referral = match shipment.courier_id {
            Some(courier_id) => self.handle.get_referral(courier_id).await?,
            None => None,
        };

        let referrer_resolvable = match &referral {
            Some(link) => self
                .handle
                .get_balance(OwnerId::courier(link.referrer_id))
                .await?
                .is_some(),
            None => false,
        };

        build_plan(
            shipment,
            delivered_at,
            referral.as_ref(),
            courier_resolvable,
            referrer_resolvable,
        )
    }

    /// Fire-and-forget `delivery.settled` notification.
    ///
    /// The settlement is durable before this runs; a publish failure is
    /// logged by the publisher's retry loop and never unwinds the commit.
    fn publish_settled(&self, shipment_id: Uuid, entry_count: usize) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };

        tokio::spawn(async move {
            let event = Event::new(
                EventType::DeliverySettled,
                PartitionKey::Shipment(shipment_id.to_string()),
                json!({
                    "shipment_id": shipment_id,
                    "entry_count": entry_count,
                    "settled_at": Utc::now(),
                }),
            )
            .with_correlation_id(shipment_id.to_string());

            if let Err(e) = publisher.publish(&event).await {
                tracing::error!(
                    shipment_id = %shipment_id,
                    error = %e,
                    "Failed to publish delivery.settled"
                );
            }
        });
    }

    /// Wallet handle, for callers that need raw ledger access
    pub fn handle(&self) -> WalletHandle {
        self.handle.clone()
    }
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Arc as StdArc;
    use wallet_core::{
        spawn_wallet_actor, BalanceSnapshot, Config, PaymentMethod, ReferralLink, Storage,
    };

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

    async fn test_engine() -> (SettlementEngine, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = StdArc::new(Storage::open(&config).unwrap());
        let handle = spawn_wallet_actor(storage);
        (SettlementEngine::new(handle), temp_dir)
    }

    #[tokio::test]
    async fn test_settle_cod_shipment() {
        let (engine, _temp) = test_engine().await;
        let handle = engine.handle();

        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier = OwnerId::courier(shipment.courier_id.unwrap());
        let client = OwnerId::client(shipment.client_id);

        handle.put_shipment(shipment).await.unwrap();
        handle.put_balance(BalanceSnapshot::zero(courier)).await.unwrap();
        handle.put_balance(BalanceSnapshot::zero(client)).await.unwrap();

        let outcome = engine.settle(shipment_id, None).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Settled { entry_count: 3, .. }));

        // Delivered with a history record
        let settled = handle.get_shipment(shipment_id).await.unwrap();
        assert_eq!(settled.status, ShipmentStatus::Delivered);
        assert_eq!(
            settled.status_history.last().unwrap().status,
            ShipmentStatus::Delivered
        );

        // COD: client +1000 -75 = 925, courier +50
        let client_balance = handle.get_balance(client).await.unwrap().unwrap();
        assert_eq!(client_balance.current_balance, Decimal::new(925, 0));

        let courier_balance = handle.get_balance(courier).await.unwrap().unwrap();
        assert_eq!(courier_balance.current_balance, Decimal::new(50, 0));
        assert_eq!(courier_balance.total_earnings, Decimal::new(50, 0));
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let (engine, _temp) = test_engine().await;
        let handle = engine.handle();

        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier = OwnerId::courier(shipment.courier_id.unwrap());

        handle.put_shipment(shipment).await.unwrap();
        handle.put_balance(BalanceSnapshot::zero(courier)).await.unwrap();

        let first = engine.settle(shipment_id, None).await.unwrap();
        assert!(matches!(first, SettlementOutcome::Settled { .. }));

        let second = engine.settle(shipment_id, None).await.unwrap();
        assert_eq!(second, SettlementOutcome::AlreadySettled);

        // Exactly one commission entry
        let entries = handle.get_owner_entries(courier).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_transfer_single_deposit() {
        let (engine, _temp) = test_engine().await;
        let handle = engine.handle();

        let mut shipment = test_shipment();
        shipment.payment_method = PaymentMethod::Transfer;
        shipment.amount_to_collect = Decimal::new(300, 0);
        shipment.courier_id = None;
        let shipment_id = shipment.shipment_id;
        let client = OwnerId::client(shipment.client_id);

        handle.put_shipment(shipment).await.unwrap();

        engine.settle(shipment_id, None).await.unwrap();

        let entries = handle.get_owner_entries(client).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, Decimal::new(300, 0));

        let balance = handle.get_balance(client).await.unwrap().unwrap();
        assert_eq!(balance.current_balance, Decimal::new(300, 0));
    }

    #[tokio::test]
    async fn test_referral_bonus_paid() {
        let (engine, _temp) = test_engine().await;
        let handle = engine.handle();

        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier_id = shipment.courier_id.unwrap();
        let referrer_id = Uuid::new_v4();
        let referrer = OwnerId::courier(referrer_id);

        handle.put_shipment(shipment).await.unwrap();
        handle
            .put_balance(BalanceSnapshot::zero(OwnerId::courier(courier_id)))
            .await
            .unwrap();
        handle.put_balance(BalanceSnapshot::zero(referrer)).await.unwrap();
        handle
            .put_referral(ReferralLink {
                courier_id,
                referrer_id,
                bonus_amount: Decimal::new(10, 0),
            })
            .await
            .unwrap();

        engine.settle(shipment_id, None).await.unwrap();

        let balance = handle.get_balance(referrer).await.unwrap().unwrap();
        assert_eq!(balance.current_balance, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn test_unresolvable_courier_does_not_fail_settlement() {
        let (engine, _temp) = test_engine().await;
        let handle = engine.handle();

        // Courier assigned but never seeded in the balance store
        let shipment = test_shipment();
        let shipment_id = shipment.shipment_id;
        let courier = OwnerId::courier(shipment.courier_id.unwrap());
        let client = OwnerId::client(shipment.client_id);

        handle.put_shipment(shipment).await.unwrap();

        let outcome = engine.settle(shipment_id, None).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Settled { entry_count: 2, .. }));

        assert!(handle.get_owner_entries(courier).await.unwrap().is_empty());
        let client_balance = handle.get_balance(client).await.unwrap().unwrap();
        assert_eq!(client_balance.current_balance, Decimal::new(925, 0));
    }
}

//! Settlement plan construction
//!
//! Pure translation of one delivered shipment into the ledger entries it
//! owes. No storage access here; resolvability of the courier and the
//! referrer is decided by the engine and passed in, so the whole payout
//! logic stays unit-testable.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use wallet_core::{EntryType, LedgerEntry, OwnerId, PaymentMethod, ReferralLink, Shipment};

/// Everything one settlement commit needs
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    /// Shipment being settled
    pub shipment_id: uuid::Uuid,

    /// Delivery timestamp recorded in the status history
    pub delivered_at: DateTime<Utc>,

    /// Ledger entries to append, all in one batch
    pub entries: Vec<LedgerEntry>,
}

/// Build the settlement plan for a shipment.
///
/// `courier_resolvable` / `referrer_resolvable` reflect whether those
/// owners exist in the balance store; a missing one skips its payout with
/// a warning instead of failing the settlement.
pub fn build_plan(
    shipment: &Shipment,
    delivered_at: DateTime<Utc>,
    referral: Option<&ReferralLink>,
    courier_resolvable: bool,
    referrer_resolvable: bool,
) -> Result<SettlementPlan> {
    let mut entries = Vec::new();

    // Courier commission
    match shipment.courier_id {
        Some(courier_id) if courier_resolvable => {
            if shipment.courier_commission > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        OwnerId::courier(courier_id),
                        EntryType::Commission,
                        shipment.courier_commission,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            } else {
                debug!(shipment_id = %shipment.shipment_id, "Zero commission, no courier entry");
            }
        }
        Some(courier_id) => {
            warn!(
                shipment_id = %shipment.shipment_id,
                courier_id = %courier_id,
                "Courier not resolvable, skipping commission"
            );
        }
        None => {
            debug!(shipment_id = %shipment.shipment_id, "No courier assigned");
        }
    }

    // Referral bonus for the courier's referrer
    if let Some(link) = referral {
        if referrer_resolvable {
            if link.bonus_amount > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        OwnerId::courier(link.referrer_id),
                        EntryType::ReferralBonus,
                        link.bonus_amount,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            }
        } else {
            warn!(
                shipment_id = %shipment.shipment_id,
                referrer_id = %link.referrer_id,
                "Referrer not resolvable, skipping bonus"
            );
        }
    }

    // Client entries by payment method
    let client = OwnerId::client(shipment.client_id);
    match shipment.payment_method {
        PaymentMethod::CashOnDelivery => {
            // Money collected from the recipient, minus the shipping fee
            if shipment.package_value > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        client,
                        EntryType::Deposit,
                        shipment.package_value,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            }
            if shipment.client_flat_rate_fee > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        client,
                        EntryType::Payment,
                        -shipment.client_flat_rate_fee,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            }
        }
        PaymentMethod::Transfer => {
            // The amount the courier must remit to the client
            if shipment.amount_to_collect > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        client,
                        EntryType::Deposit,
                        shipment.amount_to_collect,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            }
        }
        PaymentMethod::WalletPrepaid => {
            // Package already paid up front; credit its value back
            if shipment.package_value > Decimal::ZERO {
                entries.push(
                    LedgerEntry::new(
                        client,
                        EntryType::Deposit,
                        shipment.package_value,
                        Some(shipment.shipment_id),
                    )
                    .map_err(|e| Error::Plan(e.to_string()))?,
                );
            }
        }
    }

    Ok(SettlementPlan {
        shipment_id: shipment.shipment_id,
        delivered_at,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wallet_core::ShipmentStatus;

    fn shipment(method: PaymentMethod) -> Shipment {
        Shipment {
            shipment_id: Uuid::new_v4(),
            status: ShipmentStatus::OutForDelivery,
            status_history: vec![],
            courier_id: Some(Uuid::new_v4()),
            client_id: Uuid::new_v4(),
            recipient_phone: "+20101112222".to_string(),
            payment_method: method,
            package_value: Decimal::new(1000, 0),
            client_flat_rate_fee: Decimal::new(75, 0),
            courier_commission: Decimal::new(50, 0),
            amount_to_collect: Decimal::new(300, 0),
        }
    }

    #[test]
    fn test_cod_plan() {
        let s = shipment(PaymentMethod::CashOnDelivery);
        let plan = build_plan(&s, Utc::now(), None, true, false).unwrap();

        // Commission + Deposit + Payment
        assert_eq!(plan.entries.len(), 3);

        let client = OwnerId::client(s.client_id);
        let client_sum: Decimal = plan
            .entries
            .iter()
            .filter(|e| e.owner == client)
            .map(|e| e.amount)
            .sum();
        assert_eq!(client_sum, Decimal::new(925, 0)); // 1000 - 75

        let courier = OwnerId::courier(s.courier_id.unwrap());
        let commission: Decimal = plan
            .entries
            .iter()
            .filter(|e| e.owner == courier)
            .map(|e| e.amount)
            .sum();
        assert_eq!(commission, Decimal::new(50, 0));
    }

    #[test]
    fn test_transfer_plan_single_deposit() {
        let s = shipment(PaymentMethod::Transfer);
        let plan = build_plan(&s, Utc::now(), None, true, false).unwrap();

        let client = OwnerId::client(s.client_id);
        let client_entries: Vec<_> =
            plan.entries.iter().filter(|e| e.owner == client).collect();
        assert_eq!(client_entries.len(), 1);
        assert_eq!(client_entries[0].entry_type, EntryType::Deposit);
        assert_eq!(client_entries[0].amount, Decimal::new(300, 0));
    }

    #[test]
    fn test_wallet_prepaid_plan() {
        let s = shipment(PaymentMethod::WalletPrepaid);
        let plan = build_plan(&s, Utc::now(), None, true, false).unwrap();

        let client = OwnerId::client(s.client_id);
        let client_entries: Vec<_> =
            plan.entries.iter().filter(|e| e.owner == client).collect();
        assert_eq!(client_entries.len(), 1);
        assert_eq!(client_entries[0].amount, Decimal::new(1000, 0));
    }

    #[test]
    fn test_unresolvable_courier_skips_commission() {
        let s = shipment(PaymentMethod::CashOnDelivery);
        let plan = build_plan(&s, Utc::now(), None, false, false).unwrap();

        let courier = OwnerId::courier(s.courier_id.unwrap());
        assert!(plan.entries.iter().all(|e| e.owner != courier));
        // Client entries still present
        assert_eq!(plan.entries.len(), 2);
    }

    #[test]
    fn test_referral_bonus_for_resolvable_referrer() {
        let s = shipment(PaymentMethod::CashOnDelivery);
        let link = ReferralLink {
            courier_id: s.courier_id.unwrap(),
            referrer_id: Uuid::new_v4(),
            bonus_amount: Decimal::new(10, 0),
        };

        let plan = build_plan(&s, Utc::now(), Some(&link), true, true).unwrap();
        let referrer = OwnerId::courier(link.referrer_id);
        let bonus: Vec<_> = plan.entries.iter().filter(|e| e.owner == referrer).collect();
        assert_eq!(bonus.len(), 1);
        assert_eq!(bonus[0].entry_type, EntryType::ReferralBonus);
        assert_eq!(bonus[0].amount, Decimal::new(10, 0));

        // Skipped when the referrer is unknown
        let plan = build_plan(&s, Utc::now(), Some(&link), true, false).unwrap();
        assert!(plan.entries.iter().all(|e| e.owner != referrer));
    }

    #[test]
    fn test_no_courier_assigned() {
        let mut s = shipment(PaymentMethod::Transfer);
        s.courier_id = None;

        let plan = build_plan(&s, Utc::now(), None, false, false).unwrap();
        assert_eq!(plan.entries.len(), 1); // Client deposit only
    }
}

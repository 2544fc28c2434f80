//! SwiftShip Settlement Engine
//!
//! Converts verified deliveries into ledger entries, exactly once:
//!
//! - **Plan**: pure translation of a shipment into courier commission,
//!   referral bonus, and client entries by payment method
//! - **Engine**: resolves collaborators, submits the atomic commit to the
//!   wallet's single writer, then publishes `delivery.settled`
//! - **Sweeper**: hourly reconciliation pass healing balance drift

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod plan;
pub mod sweep;

pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use plan::{build_plan, SettlementPlan};
pub use sweep::ReconcileSweeper;

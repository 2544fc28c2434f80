//! SwiftShip Delivery Verification
//!
//! Time-boxed, rate-limited one-time codes proving a delivery happened:
//!
//! - **CodeManager**: issuance and validation with durable sliding-window
//!   rate limits (3 issuances / 60 s, 5 validations / 300 s per shipment)
//! - **MessagingChannel**: external SMS/WhatsApp delivery behind a trait
//! - A verified code triggers settlement; the two commit atomically

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod code;
pub mod error;

pub use channel::{ChannelError, ChannelKind, ChannelReceipt, MessagingChannel, MockChannel};
pub use code::{CodeConfig, CodeManager, IssueReceipt, VerifyOutcome};
pub use error::{Error, Result};

//! Error taxonomy for code issuance and validation
//!
//! Every variant maps to a transport status code via `status_code()`, so
//! an HTTP layer can be bolted on without touching the engine.

use thiserror::Error;

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, Error>;

/// Verification errors
#[derive(Error, Debug)]
pub enum Error {
    /// Too many code issuances inside the sliding window
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the window frees up
        retry_after_secs: u64,
    },

    /// Too many validation attempts inside the sliding window
    #[error("Too many attempts, retry after {retry_after_secs}s")]
    TooManyAttempts {
        /// Seconds until the window frees up
        retry_after_secs: u64,
    },

    /// Code past its TTL
    #[error("Code expired")]
    Expired,

    /// Submitted value is not a fixed-length numeric code
    #[error("Invalid code format")]
    InvalidFormat,

    /// Well-formed code that does not match
    #[error("Invalid code")]
    InvalidCode,

    /// Shipment or code not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Shipment not in a deliverable state
    #[error("Invalid shipment state: {0}")]
    InvalidState(String),

    /// Messaging channel unavailable
    #[error("Messaging channel unavailable, retry after {retry_after_secs}s")]
    ServiceUnavailable {
        /// Seconds before the caller should retry
        retry_after_secs: u64,
    },

    /// Storage or settlement failure; safely retryable thanks to the
    /// settlement idempotency guard
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transport status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RateLimitExceeded { .. } | Error::TooManyAttempts { .. } => 429,
            Error::Expired => 410,
            Error::InvalidFormat | Error::InvalidCode => 400,
            Error::NotFound(_) => 404,
            Error::InvalidState(_) => 409,
            Error::ServiceUnavailable { .. } => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Retry-after hint, when the error is wait-and-retry recoverable
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { retry_after_secs }
            | Error::TooManyAttempts { retry_after_secs }
            | Error::ServiceUnavailable { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<wallet_core::Error> for Error {
    fn from(err: wallet_core::Error) -> Self {
        match err {
            wallet_core::Error::ShipmentNotFound(id) => Error::NotFound(id),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<settlement::Error> for Error {
    fn from(err: settlement::Error) -> Self {
        match err {
            settlement::Error::Ledger(wallet_core::Error::ShipmentNotFound(id)) => {
                Error::NotFound(id)
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

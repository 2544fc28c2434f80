//! Error types for the event bus

use thiserror::Error;

/// Event bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Stream creation error
    #[error("Stream creation error: {0}")]
    StreamCreation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timed out
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for Carrier

use thiserror::Error;

/// Result type alias for Carrier operations
pub type Result<T> = std::result::Result<T, CarrierError>;

/// Main error type for Carrier
#[derive(Error, Debug)]
pub enum CarrierError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Catch-all for third-party [`crate::DurableStore`] implementations
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CarrierError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, CarrierError::Storage(_) | CarrierError::Io(_))
    }
}

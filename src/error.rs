//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Rate-limit denials are never errors; they are returned as verdicts.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistent state store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

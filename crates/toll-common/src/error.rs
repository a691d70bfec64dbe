//! Error types shared across the toll-data workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, TollError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum TollError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),
}

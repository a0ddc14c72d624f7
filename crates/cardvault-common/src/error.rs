//! Error types shared across Cardvault crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CardvaultError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum CardvaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

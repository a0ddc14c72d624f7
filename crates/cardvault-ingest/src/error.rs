//! Error types for the ingestion pipeline

use cardvault_common::CardvaultError;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Classified failure from a remote collaborator (asset host, sink, object store)
///
/// The retry controller decides what to do from the variant alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The resource does not exist; never retried
    #[error("remote resource not found")]
    NotFound,

    /// The remote asked us to slow down (HTTP 429 or equivalent)
    #[error("rate limited by remote")]
    RateLimited,

    /// Any other non-success status
    #[error("remote returned status {0}")]
    Status(u16),

    /// Connection, timeout, or client-side failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Map an HTTP status code onto the retry taxonomy
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => RemoteError::NotFound,
            429 => RemoteError::RateLimited,
            other => RemoteError::Status(other),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError::from_status(status.as_u16()),
            None => RemoteError::Transport(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for RemoteError {
    fn from(err: sqlx::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// Error types for split and seed runs
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Structural problem in the bulk input; fatal for the pass
    #[error("Invalid input at record {record}: {message}")]
    InvalidInput { record: u64, message: String },

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Set not found: {0}")]
    GroupNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Asset codec error: {0}")]
    Codec(String),
}

impl From<CardvaultError> for IngestError {
    fn from(err: CardvaultError) -> Self {
        match err {
            CardvaultError::Io(e) => IngestError::Io(e),
            CardvaultError::Serialization(e) => IngestError::Json(e),
            CardvaultError::InvalidPath(p) => {
                IngestError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, p))
            },
        }
    }
}

impl IngestError {
    /// Short category label used in the error log
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Io(_) => "io",
            IngestError::Json(_) => "json",
            IngestError::Http(_) => "http",
            IngestError::Database(_) | IngestError::Migration(_) => "database",
            IngestError::Storage(_) => "storage",
            IngestError::Remote(_) => "remote",
            IngestError::InvalidInput { .. } => "input",
            IngestError::MissingPrerequisite(_) => "prerequisite",
            IngestError::GroupNotFound(_) => "not_found",
            IngestError::Config(_) => "config",
            IngestError::Codec(_) => "codec",
        }
    }
}

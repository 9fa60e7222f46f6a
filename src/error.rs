//! Error types for the complaint trends pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Transient failure of one source; the coordinator fails over to the
    /// next source in priority order. The field is `name`, not `source`,
    /// so thiserror does not treat the plain string as an error cause.
    #[error("Source '{name}' unavailable: {reason}")]
    Source { name: String, reason: String },

    /// Terminal: no source produced coverage for the requested window.
    #[error("No data available for window {window}; attempted: {attempts}")]
    DataUnavailable { window: String, attempts: String },

    /// A cache hit exists but its fetch metadata failed the TTL/validity
    /// check. Internal signal only; triggers a re-fetch.
    #[error("Cache entry is stale or carries implausible fetch metadata")]
    StaleCache,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch was cancelled")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap any failure of a named source as a transient `Source` error.
    pub fn source(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::Source {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

//! Engine error types.
//!
//! Data-quality problems (malformed rows, unknown event labels, conflicting
//! identities) are never errors; they are counted and logged. These variants
//! cover configuration mistakes and upstream failures under strict mode.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A data source could not be read and no fallback was allowed
    #[error("source {source_name} unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    /// Paid roster could not be fetched under strict mode
    #[error("paid roster unavailable: {0}")]
    RosterUnavailable(String),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    pub fn unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

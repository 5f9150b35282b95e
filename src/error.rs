//! Error types for the evasion risk engine
//!
//! Structural problems (no header, no records, bad configuration) are fatal and
//! surface as [`EngineError`]. A backend failing on a single feature vector is a
//! [`ScoringError`], which the orchestrator recovers per record.

use thiserror::Error;

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Header row not found within the first {window} rows (scanned: {})", .scanned.join(" | "))]
    SchemaDetection {
        /// Size of the scan window that was searched
        window: usize,
        /// Rendered contents of each scanned row, for diagnosis
        scanned: Vec<String>,
    },

    /// Lets callers of [`RiskEngine::assess`](crate::RiskEngine::assess) use `?`
    /// in functions returning `EngineError`. Batch runs record these per record
    /// instead.
    #[error("Scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("No valid student records to process")]
    EmptyBatch,

    #[error("Invalid rule configuration: {0}")]
    RuleConfiguration(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Failure of a probability backend on one feature vector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("feature vector has {actual} values, backend expects {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("feature schema version {actual} does not match backend version {expected}")]
    SchemaVersion { expected: u32, actual: u32 },

    #[error("backend produced a non-finite probability")]
    NonFinite,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

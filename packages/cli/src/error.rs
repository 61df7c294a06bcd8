//! Error types for the command line.

use thiserror::Error;

/// Main error type for the command line.
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine failure (loading, ordering, computation).
    #[error(transparent)]
    Engine(#[from] devis_engine::EngineError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed `--progress` value.
    #[error("Invalid progress '{0}'. Expected <line id>=<percent> (e.g., 111=40)")]
    InvalidProgress(String),

    /// `--progress` names a line the situation does not bill.
    #[error("Line {0} is not billable in this situation")]
    UnknownLine(String),

    /// `--previous` holds a situation of another month.
    #[error("Previous situation is for {found}, expected {expected}")]
    PreviousPeriod { expected: String, found: String },
}

/// Result type alias for command line operations.
pub type Result<T> = std::result::Result<T, CliError>;

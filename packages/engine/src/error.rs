//! Error types for the devis engine

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to load or parse a document
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A node references a parent that is not part of the document.
    ///
    /// Raised for reporting only: the projector excludes the node and carries on.
    #[error("Orphan node {id}: parent {parent} not found")]
    OrphanNode { id: String, parent: String },

    /// A percentage base resolved back onto the line that requested it
    #[error("Circular base reference: {0}")]
    CircularBaseReference(String),

    /// A progress percentage outside [0, 100] (clamped by the caller)
    #[error("Invalid percentage: {0}")]
    InvalidPercentage(f64),

    /// The store rejected an ordering update made against a stale revision
    #[error("Persistence conflict: expected revision {expected}, store is at {actual}")]
    PersistenceConflict { expected: u64, actual: u64 },

    /// Node not found in the document
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The requested target position cannot hold the node
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Month/year pair that is not a calendar month
    #[error("Invalid period: {month}/{year}")]
    InvalidPeriod { month: u32, year: i32 },

    /// A situation cannot be rewritten once the next period exists
    #[error("Situation {0} is superseded by a later period")]
    SituationLocked(String),

    /// Malformed monetary or numeric value
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Computation produced a non-finite total
    #[error("Computation error: {0}")]
    Computation(String),

    /// Resource limit exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Project not known to the store
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

//! Error types for Engram

use thiserror::Error;

/// Main error type for Engram operations
#[derive(Error, Debug)]
pub enum EngramError {
    /// Extraction gateway failures (transient, retried by the scheduler)
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Storage write failures (transient, bounded retry then drop-with-log)
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Storage query failures (non-fatal, retrieval degrades to empty)
    #[error("Storage query error: {0}")]
    StorageQuery(String),

    /// Configuration errors (fatal at construction)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted after the orchestrator was shut down
    #[error("Orchestrator is closed")]
    Closed,

    /// Caller supplied invalid input (e.g. empty conversation id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, EngramError>;

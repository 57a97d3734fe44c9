//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving or loading checkpoints
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint matched the requested thread or id
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Config or snapshot is missing required data
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Shorthand for the error returned when a config has no thread id
    pub fn missing_thread_id() -> Self {
        Self::Invalid("thread_id is required".to_string())
    }
}

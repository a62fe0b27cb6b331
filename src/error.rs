//! Error handling module for the storage workflow engine
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Validation problems that only disable forward navigation are NOT errors;
//! they are reported through `NextGate`. The variants below cover calls that
//! cannot be honoured at all.

use thiserror::Error;

/// Main error type for the storage workflow engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO errors (fixture files, config files, lsblk output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (invalid mount point, unknown row, locked device)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Disk inventory errors (unknown device, enumeration failure)
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Unlock attempts that failed
    #[error("Unlock error: {0}")]
    Unlock(#[from] crate::unlock::UnlockError),

    /// Partitioning object lifecycle errors
    #[error("Partitioning error: {0}")]
    Partitioning(String),

    /// Workflow navigation errors
    #[error("Workflow transition error: {0}")]
    Transition(#[from] crate::workflow_state::WorkflowTransitionError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for storage workflow operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an inventory error
    pub fn inventory(msg: impl Into<String>) -> Self {
        Self::Inventory(msg.into())
    }

    /// Create a partitioning error
    pub fn partitioning(msg: impl Into<String>) -> Self {
        Self::Partitioning(msg.into())
    }
}

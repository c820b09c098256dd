//! Error types for the rewind engine
//!
//! All fallible operations return [`Result`]. The engine's default posture is
//! non-fatal degradation: most errors are absorbed at the session boundary
//! (checkpointing is disabled, conversation flow continues) and only restore
//! failures propagate to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the rewind crate
pub type Result<T> = std::result::Result<T, RewindError>;

/// Main error type for all rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Object not found in content-addressable storage
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Snapshot manifest not found for a tree id
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Checkpoint reference not found
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot store is not initialized
    #[error("Store not initialized at path: {0:?}")]
    StoreNotInitialized(PathBuf),

    /// The working directory cannot host a snapshot store
    #[error("Unsupported working directory: {0:?}")]
    UnsupportedWorktree(PathBuf),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Restore operation failed
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// No session is active for the requested operation
    #[error("No active session")]
    NoActiveSession,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// UTF-8 conversion error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversions for bincode 2.0 error types
impl From<bincode::error::DecodeError> for RewindError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RewindError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl RewindError {
    /// Create a storage error with a custom message
    pub fn storage(msg: impl Into<String>) -> Self {
        RewindError::Storage(msg.into())
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        RewindError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        RewindError::Decompression(msg.into())
    }

    /// Create a restore error with a custom message
    pub fn restore(msg: impl Into<String>) -> Self {
        RewindError::RestoreFailed(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RewindError::Internal(msg.into())
    }

    /// Check if this error should disable checkpointing for the session
    /// rather than surface to the caller
    pub fn is_disabling(&self) -> bool {
        matches!(
            self,
            RewindError::UnsupportedWorktree(_)
                | RewindError::StoreNotInitialized(_)
                | RewindError::Storage(_)
        )
    }
}

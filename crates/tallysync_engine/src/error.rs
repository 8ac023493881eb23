//! Error types for the sync engine.

use tallysync_protocol::ProtocolError;
use tallysync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Server failed to process the request (5xx).
    #[error("server error: {0}")]
    ServerError(String),

    /// Request was rejected as invalid (payload rules or 4xx response).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Queued operation of a kind this build cannot dispatch.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Operation log is full and configured to refuse new work.
    #[error("operation log is full ({capacity} operations)")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// Durable storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true if this error means the request itself is invalid.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Validation { .. } => SyncError::Validation(err.to_string()),
            ProtocolError::Json(e) => SyncError::Codec(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}



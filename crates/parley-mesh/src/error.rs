//! Error types for mesh operations

use thiserror::Error;

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur during mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// Failed to send message
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Message serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Queue is full (backpressure)
    #[error("Queue full: capacity {capacity}, current size {current}")]
    QueueFull { capacity: usize, current: usize },

    /// Agent not connected to the mesh
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Agent already holds a mailbox on the mesh
    #[error("Agent already connected: {0}")]
    AlreadyConnected(String),

    /// A reply was requested for a message that names no sender
    #[error("Message {0} carries no reply address")]
    NoReplyAddress(String),

    /// Operation timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid agent identifier
    #[error("Invalid agent id: {0}")]
    InvalidId(#[from] crate::types::IdValidationError),

    /// The owning task was cancelled before the operation completed
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::SerializationFailed(err.to_string())
    }
}

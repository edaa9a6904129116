//! Error types for identity lookup and worker startup

use thiserror::Error;

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors returned by the startup coordinator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No identity is cached for the key
    #[error("No identity cached for {0}")]
    UnknownKey(String),

    /// The entry cannot be removed while its worker startup is in flight
    #[error("Worker startup pending for {0}")]
    StartupPending(String),

    /// Starting the worker failed; every concurrent caller sees the same error
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Failure of a worker launch
///
/// Cloneable so a single outcome can be handed to every waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Worker launch failed: {0}")]
    Failed(String),

    #[error("Worker launch cancelled")]
    Cancelled,

    /// The launch task panicked or was aborted
    #[error("Worker launch aborted: {0}")]
    Aborted(String),
}

impl LaunchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        LaunchError::Failed(reason.into())
    }
}

//! Error types for the behaviour runtime

use parley_mesh::MeshError;
use thiserror::Error;

/// Result type for wiring and running a behaviour
pub type BehaviourResult<T> = Result<T, BehaviourError>;

/// Errors raised while wiring or running a state machine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BehaviourError {
    /// A handler asked for a transition that was never declared
    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    /// A state name that was never added
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// A state with this name already exists
    #[error("State already declared: {0}")]
    DuplicateState(String),

    /// A second state was marked initial
    #[error("Initial state already set to '{0}'")]
    InitialAlreadySet(String),

    /// The machine was started without an initial state
    #[error("No initial state declared")]
    NoInitialState,

    /// A graph builder was called with unusable arguments
    #[error("Invalid wiring: {0}")]
    InvalidWiring(String),
}

/// Failure reported by a state handler
///
/// Handler failures never end the behaviour: the runtime logs them and the
/// machine stays in its current state.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// The handler refused the message
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

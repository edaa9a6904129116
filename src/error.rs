//! Error type of the parley facade

use parley_behaviour::BehaviourError;
use parley_identity::IdentityError;
use parley_mesh::MeshError;
use parley_observability::ObservabilityError;
use thiserror::Error;

/// Errors surfaced by a parley host
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Behaviour error: {0}")]
    Behaviour(#[from] BehaviourError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Observability error: {0}")]
    Observability(#[from] ObservabilityError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ParleyError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type ParleyResult<T> = Result<T, ParleyError>;

//! # Parley Behaviour
//!
//! Finite-state behaviours for Parley agents. A behaviour is a set of named
//! [`State`]s plus the edges declared between them. Each inbound message goes
//! to the current state's handler, whose [`ControlSignal`] decides whether the
//! machine stays or moves along a declared edge.
//!
//! Handler failures are contained: errors and panics are logged and the
//! machine stays where it was. Asking for an undeclared edge ends the behaviour
//! with [`BehaviourError::InvalidTransition`].

pub mod error;
pub mod fsm;
pub mod runtime;
pub mod state;

pub use error::{BehaviourError, BehaviourResult, HandlerError};
pub use fsm::{Dispatched, Fsm};
pub use runtime::{BehaviourHandle, spawn_behaviour};
pub use state::{ControlSignal, State};

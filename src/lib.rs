//! # Parley
//!
//! Message-driven agents for chat-platform backends. Each agent runs a finite
//! state machine over its inbox, talks to other agents through correlated
//! request/reply, and starts the per-user worker agents it needs at most once,
//! however many events for the same user race in.
//!
//! The workspace is split into:
//!
//! - [`mesh`]: messages, templates, inboxes, the in-memory transport and request/reply
//! - [`behaviour`]: the FSM dispatcher
//! - [`identity`]: the identity cache and single-flight worker startup
//! - [`observability`]: logging setup
//!
//! This crate re-exports them and adds [`ParleyConfig`] and [`ParleyError`].

pub mod config;
pub mod error;

pub use parley_behaviour as behaviour;
pub use parley_identity as identity;
pub use parley_mesh as mesh;
pub use parley_observability as observability;

pub use config::ParleyConfig;
pub use error::{ParleyError, ParleyResult};

pub use parley_behaviour::{ControlSignal, Fsm, HandlerError, State, spawn_behaviour};
pub use parley_identity::{
    CacheKey, Identity, IdentityCache, StartOutcome, StartupCoordinator, WorkerLauncher,
};
pub use parley_mesh::{
    AgentId, AgentMesh, InMemoryMesh, Inbox, Message, Performative, ReplyHandler,
    RequestReplyChannel, Template,
};

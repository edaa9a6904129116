//! # Parley Mesh
//!
//! Messaging layer for Parley agents.
//!
//! Agents exchange [`Message`]s over an [`AgentMesh`]. Each agent reads its
//! mailbox through an [`Inbox`], which routes inbound traffic either to
//! one-shot or persistent listeners selected by a [`Template`], or to the
//! agent's own behaviour queue. Correlated request/reply is layered on top in
//! [`patterns::request_reply`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use parley_mesh::{AgentId, AgentMesh, InMemoryMesh, Inbox, Message, Template};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mesh = InMemoryMesh::default();
//!     let gateway = AgentId::parse("gateway")?;
//!
//!     let mut inbox = Inbox::connect(
//!         &mesh,
//!         gateway.clone(),
//!         Template::any(),
//!         mesh.metrics().clone(),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     mesh.send(Message::new(gateway, "hello")).await?;
//!     let received = inbox.receive(None).await;
//!     assert_eq!(received.map(|m| m.body), Some("hello".to_string()));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod inbox;
pub mod memory;
pub mod mesh;
pub mod message;
pub mod metrics;
pub mod patterns;
pub mod presence;
pub mod template;
pub mod types;

pub use error::{MeshError, MeshResult};
pub use inbox::{Inbox, ListenerId, ListenerRegistry};
pub use memory::{InMemoryMesh, MeshConfig, MeshPresence};
pub use mesh::{AgentMesh, MessageStream};
pub use message::{Message, MessageId, MessageMetadata, Performative, fields};
pub use metrics::{LatencyStats, MeshMetrics, MeshMetricsCollector};
pub use patterns::{
    PendingReply, ReplyHandler, ReplyOutcome, RequestReplyChannel, RequestReplyConfig,
};
pub use presence::{
    PresenceCheck, PresenceSubscriber, SubscriptionConfig, SubscriptionOutcome,
    spawn_subscribe_until_present,
};
pub use template::Template;
pub use types::{AgentId, IdValidationError};

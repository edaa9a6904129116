//! Core AgentMesh trait for agent-to-agent transport

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{error::MeshResult, message::Message, types::AgentId};

/// Stream type for receiving messages
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send + 'static>>;

/// Point-to-point transport between agents
///
/// Implementations must deliver messages to one recipient in the order they
/// were sent. No ordering is promised across recipients.
///
/// # Example
///
/// ```rust,no_run
/// use parley_mesh::{AgentId, AgentMesh, InMemoryMesh, Message};
///
/// async fn example(mesh: InMemoryMesh) -> Result<(), Box<dyn std::error::Error>> {
///     let registry = AgentId::parse("registry")?;
///     let _mailbox = mesh.connect(&registry).await?;
///
///     mesh.send(Message::new(registry, "hello")).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait AgentMesh: Send + Sync {
    /// Deliver a message to `message.to`
    ///
    /// # Errors
    ///
    /// Returns `MeshError::AgentNotFound` when the recipient holds no mailbox and
    /// `MeshError::QueueFull` when its mailbox is saturated.
    async fn send(&self, message: Message) -> MeshResult<()>;

    /// Open the mailbox of `agent` and return the stream of its messages
    ///
    /// An agent holds at most one mailbox at a time.
    async fn connect(&self, agent: &AgentId) -> MeshResult<MessageStream>;

    /// Close the mailbox of `agent`; the stream returned by `connect` ends
    async fn disconnect(&self, agent: &AgentId) -> MeshResult<()>;

    /// Check if an agent currently holds a mailbox
    async fn is_reachable(&self, agent: &AgentId) -> bool;

    /// List all agents currently connected
    async fn list_agents(&self) -> MeshResult<Vec<AgentId>>;

    /// Messages waiting in the mailbox of `agent`
    async fn queue_depth(&self, agent: &AgentId) -> MeshResult<usize>;
}

//! In-process implementation of AgentMesh backed by bounded channels

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{
    error::{MeshError, MeshResult},
    mesh::{AgentMesh, MessageStream},
    message::Message,
    metrics::MeshMetricsCollector,
    presence::{PresenceCheck, PresenceSubscriber},
    types::AgentId,
};

/// Mesh configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Capacity of each agent mailbox
    pub mailbox_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
        }
    }
}

impl MeshConfig {
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

struct Inner {
    config: MeshConfig,
    mailboxes: RwLock<HashMap<AgentId, mpsc::Sender<Message>>>,
    /// observer -> agents it follows
    subscriptions: RwLock<HashMap<AgentId, BTreeSet<AgentId>>>,
    metrics: MeshMetricsCollector,
}

/// In-process mesh. Cloning shares the same mailboxes.
#[derive(Clone)]
pub struct InMemoryMesh {
    inner: Arc<Inner>,
}

impl Default for InMemoryMesh {
    fn default() -> Self {
        Self::new(MeshConfig::default())
    }
}

impl InMemoryMesh {
    /// Create a new mesh
    pub fn new(config: MeshConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                mailboxes: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                metrics: MeshMetricsCollector::default(),
            }),
        }
    }

    /// Metrics shared by the mesh and every inbox attached to it
    pub fn metrics(&self) -> &MeshMetricsCollector {
        &self.inner.metrics
    }

    /// Presence view of the mesh as seen by `observer`
    pub fn presence_for(&self, observer: AgentId) -> MeshPresence {
        MeshPresence {
            mesh: self.clone(),
            observer,
        }
    }

    /// Agents `observer` has subscribed to
    pub async fn contacts(&self, observer: &AgentId) -> Vec<AgentId> {
        self.inner
            .subscriptions
            .read()
            .await
            .get(observer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentMesh for InMemoryMesh {
    async fn send(&self, message: Message) -> MeshResult<()> {
        let to = message.to.clone();
        let mut closed = false;
        let result = {
            let mailboxes = self.inner.mailboxes.read().await;
            match mailboxes.get(&to) {
                None => Err(MeshError::AgentNotFound(to.to_string())),
                Some(sender) => match sender.try_send(message) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => Err(MeshError::QueueFull {
                        capacity: sender.max_capacity(),
                        current: sender.max_capacity() - sender.capacity(),
                    }),
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed = true;
                        Err(MeshError::AgentNotFound(to.to_string()))
                    }
                },
            }
        };

        // The receiving agent went away without disconnecting
        if closed {
            let mut mailboxes = self.inner.mailboxes.write().await;
            if mailboxes.get(&to).is_some_and(|tx| tx.is_closed()) {
                mailboxes.remove(&to);
                debug!(agent = %to, "Pruned closed mailbox");
            }
        }

        match &result {
            Ok(()) => {
                debug!(to = %to, "Message delivered to mailbox");
                self.inner.metrics.record_send().await;
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Message send failed");
                self.inner.metrics.record_send_failure().await;
            }
        }
        result
    }

    async fn connect(&self, agent: &AgentId) -> MeshResult<MessageStream> {
        let capacity = self.inner.config.mailbox_capacity;
        if capacity == 0 {
            return Err(MeshError::InvalidConfig(
                "mailbox_capacity must be greater than zero".to_string(),
            ));
        }

        let mut mailboxes = self.inner.mailboxes.write().await;
        if let Some(existing) = mailboxes.get(agent)
            && !existing.is_closed()
        {
            return Err(MeshError::AlreadyConnected(agent.to_string()));
        }

        let (tx, rx) = mpsc::channel(capacity);
        mailboxes.insert(agent.clone(), tx);
        debug!(agent = %agent, capacity, "Agent connected to mesh");

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn disconnect(&self, agent: &AgentId) -> MeshResult<()> {
        let removed = self.inner.mailboxes.write().await.remove(agent);
        self.inner.subscriptions.write().await.remove(agent);
        match removed {
            Some(_) => {
                debug!(agent = %agent, "Agent disconnected from mesh");
                Ok(())
            }
            None => Err(MeshError::AgentNotFound(agent.to_string())),
        }
    }

    async fn is_reachable(&self, agent: &AgentId) -> bool {
        self.inner
            .mailboxes
            .read()
            .await
            .get(agent)
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn list_agents(&self) -> MeshResult<Vec<AgentId>> {
        let mut agents: Vec<AgentId> = self
            .inner
            .mailboxes
            .read()
            .await
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        agents.sort();
        Ok(agents)
    }

    async fn queue_depth(&self, agent: &AgentId) -> MeshResult<usize> {
        let mailboxes = self.inner.mailboxes.read().await;
        let tx = mailboxes
            .get(agent)
            .ok_or_else(|| MeshError::AgentNotFound(agent.to_string()))?;
        Ok(tx.max_capacity() - tx.capacity())
    }
}

#[async_trait]
impl PresenceCheck for InMemoryMesh {
    async fn is_live(&self, agent: &AgentId) -> bool {
        self.is_reachable(agent).await
    }
}

/// Presence capability of one agent on an [`InMemoryMesh`]
#[derive(Clone)]
pub struct MeshPresence {
    mesh: InMemoryMesh,
    observer: AgentId,
}

#[async_trait]
impl PresenceCheck for MeshPresence {
    async fn is_live(&self, agent: &AgentId) -> bool {
        self.mesh.is_reachable(agent).await
    }
}

#[async_trait]
impl PresenceSubscriber for MeshPresence {
    async fn subscribe(&self, target: &AgentId) -> MeshResult<()> {
        self.mesh
            .inner
            .subscriptions
            .write()
            .await
            .entry(self.observer.clone())
            .or_default()
            .insert(target.clone());
        debug!(observer = %self.observer, target_agent = %target, "Subscribed to presence");
        Ok(())
    }
}

//! Presence double

use async_trait::async_trait;
use parley_mesh::{AgentId, MeshResult, PresenceCheck, PresenceSubscriber};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Presence whose answers the test controls
///
/// Agents are absent until [`set_live`](Self::set_live) says otherwise. With
/// [`live_after_subscribes`](Self::live_after_subscribes) an agent turns live on
/// its own after enough subscribe calls.
#[derive(Debug, Clone, Default)]
pub struct SwitchablePresence {
    live: Arc<Mutex<HashSet<AgentId>>>,
    subscribes: Arc<Mutex<Vec<AgentId>>>,
    live_after: Option<usize>,
}

impl SwitchablePresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `agent` present after it has been subscribed to `count` times
    pub fn live_after_subscribes(mut self, count: usize) -> Self {
        self.live_after = Some(count);
        self
    }

    pub fn set_live(&self, agent: &AgentId, live: bool) {
        let mut set = self.live.lock().unwrap();
        if live {
            set.insert(agent.clone());
        } else {
            set.remove(agent);
        }
    }

    /// Number of subscribe calls received
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.lock().unwrap().len()
    }
}

#[async_trait]
impl PresenceCheck for SwitchablePresence {
    async fn is_live(&self, agent: &AgentId) -> bool {
        self.live.lock().unwrap().contains(agent)
    }
}

#[async_trait]
impl PresenceSubscriber for SwitchablePresence {
    async fn subscribe(&self, target: &AgentId) -> MeshResult<()> {
        let count = {
            let mut subscribes = self.subscribes.lock().unwrap();
            subscribes.push(target.clone());
            subscribes.iter().filter(|a| *a == target).count()
        };
        if self.live_after.is_some_and(|needed| count >= needed) {
            self.set_live(target, true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_switching() {
        let presence = SwitchablePresence::new();
        let agent = AgentId::new_unchecked("registry");

        assert!(!presence.is_live(&agent).await);
        presence.set_live(&agent, true);
        assert!(presence.is_live(&agent).await);
        presence.set_live(&agent, false);
        assert!(!presence.is_live(&agent).await);
    }

    #[tokio::test]
    async fn test_live_after_subscribes() {
        let presence = SwitchablePresence::new().live_after_subscribes(2);
        let agent = AgentId::new_unchecked("registry");

        presence.subscribe(&agent).await.unwrap();
        assert!(!presence.is_live(&agent).await);
        presence.subscribe(&agent).await.unwrap();
        assert!(presence.is_live(&agent).await);
        assert_eq!(presence.subscribe_count(), 2);
    }
}

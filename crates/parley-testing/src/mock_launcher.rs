//! Worker launcher double

use async_trait::async_trait;
use parley_identity::{CacheKey, Identity, LaunchError, WorkerLauncher};
use parley_mesh::AgentId;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A launcher that records every call and returns scripted outcomes
///
/// Clones share their call history.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    delay: Duration,
    failures_left: Arc<Mutex<usize>>,
    failure_reason: String,
    calls: Arc<Mutex<Vec<CacheKey>>>,
}

impl MockLauncher {
    /// Launcher that succeeds at once
    pub fn new() -> Self {
        Self {
            failure_reason: "mock launch failure".to_string(),
            ..Self::default()
        }
    }

    /// Wait `delay` inside every launch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `count` launches with `reason`
    pub fn with_failures(mut self, count: usize, reason: impl Into<String>) -> Self {
        *self.failures_left.lock().unwrap() = count;
        self.failure_reason = reason.into();
        self
    }

    /// Number of launches started
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Keys launched, in call order
    pub fn call_history(&self) -> Vec<CacheKey> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called_with(&self, key: &CacheKey) -> bool {
        self.calls.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    fn worker_id(&self, identity: &Identity) -> AgentId {
        AgentId::for_worker("user", identity.as_str())
            .unwrap_or_else(|_| AgentId::new_unchecked(format!("user-{identity}")))
    }

    async fn start(&self, key: &CacheKey, identity: &Identity) -> Result<AgentId, LaunchError> {
        self.calls.lock().unwrap().push(key.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(LaunchError::failed(self.failure_reason.clone()));
        }
        Ok(self.worker_id(identity))
    }
}

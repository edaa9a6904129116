//! Starts worker agents on the in-memory mesh

use async_trait::async_trait;
use parley::identity::LaunchError;
use parley::{
    AgentId, CacheKey, Identity, InMemoryMesh, Inbox, Template, WorkerLauncher, spawn_behaviour,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::platform::ChatPlatform;
use super::worker::{WorkerCtx, worker_behaviour};

pub struct MeshWorkerLauncher {
    mesh: InMemoryMesh,
    platform: Arc<dyn ChatPlatform>,
    boot_delay: Duration,
    launches: AtomicUsize,
    cancel: CancellationToken,
}

impl MeshWorkerLauncher {
    /// `boot_delay` stands in for the time a real worker takes to come up
    pub fn new(
        mesh: InMemoryMesh,
        platform: Arc<dyn ChatPlatform>,
        boot_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mesh,
            platform,
            boot_delay,
            launches: AtomicUsize::new(0),
            cancel,
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for MeshWorkerLauncher {
    fn worker_id(&self, identity: &Identity) -> AgentId {
        AgentId::for_worker("user", identity.as_str())
            .unwrap_or_else(|_| AgentId::new_unchecked(format!("user-{identity}")))
    }

    async fn start(&self, key: &CacheKey, identity: &Identity) -> Result<AgentId, LaunchError> {
        let worker = self.worker_id(identity);
        self.launches.fetch_add(1, Ordering::SeqCst);
        info!(key = %key, worker = %worker, "Booting worker");

        tokio::time::sleep(self.boot_delay).await;

        let fsm =
            worker_behaviour(worker.as_str()).map_err(|e| LaunchError::failed(e.to_string()))?;
        let inbox = Inbox::connect(
            &self.mesh,
            worker.clone(),
            Template::any(),
            self.mesh.metrics().clone(),
            self.cancel.child_token(),
        )
        .await
        .map_err(|e| LaunchError::failed(e.to_string()))?;

        let ctx = WorkerCtx::new(identity.clone(), Arc::clone(&self.platform));
        spawn_behaviour(fsm, ctx, inbox, self.cancel.child_token());
        Ok(worker)
    }
}

//! In-process demo: gateway, registry and per-user workers on one mesh

use futures::future::join_all;
use parley::mesh::{SubscriptionOutcome, spawn_subscribe_until_present};
use parley::{
    AgentId, AgentMesh, IdentityCache, InMemoryMesh, Inbox, Message, ParleyConfig, ParleyError,
    ParleyResult, RequestReplyChannel, StartupCoordinator, Template, spawn_behaviour,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::gateway::{GATEWAY, Gateway, gateway_behaviour};
use super::launcher::MeshWorkerLauncher;
use super::platform::{ChatPlatform, ConsoleChat};
use super::registry::{Directory, REGISTRY, RegistryCtx, keys, registry_behaviour};

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub platform: String,
    pub users: usize,
    pub events_per_user: usize,
    pub launch_delay: Duration,
    pub directory: Directory,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            platform: "telegram".to_string(),
            users: 1,
            events_per_user: 8,
            launch_delay: Duration::from_millis(200),
            directory: Directory::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemoReport {
    pub events_sent: usize,
    pub texts_delivered: usize,
    pub workers_launched: usize,
    pub workers_live: Vec<String>,
    pub completed: bool,
}

/// Platform user ids used by the demo, `"1"` to `"<users>"`
pub fn demo_users(users: usize) -> Vec<String> {
    (1..=users).map(|n| n.to_string()).collect()
}

pub async fn run_demo(config: &ParleyConfig, options: DemoOptions) -> ParleyResult<DemoReport> {
    let mesh = InMemoryMesh::new(config.mesh.clone());
    let cancel = CancellationToken::new();
    let platform = Arc::new(ConsoleChat::new(options.platform.clone()));
    let registry = AgentId::new_unchecked(REGISTRY);
    let me = AgentId::new_unchecked(GATEWAY);

    // Registry
    let registry_inbox = Inbox::connect(
        &mesh,
        registry.clone(),
        Template::any(),
        mesh.metrics().clone(),
        cancel.child_token(),
    )
    .await?;
    let registry_ctx = RegistryCtx::new(Arc::new(mesh.clone()), options.directory.clone());
    spawn_behaviour(registry_behaviour()?, registry_ctx, registry_inbox, cancel.child_token());

    // Gateway
    let gateway_inbox = Inbox::connect(
        &mesh,
        me.clone(),
        Template::any(),
        mesh.metrics().clone(),
        cancel.child_token(),
    )
    .await?;
    let presence = Arc::new(mesh.presence_for(me.clone()));
    let outcome = spawn_subscribe_until_present(
        Arc::clone(&presence),
        registry.clone(),
        &config.presence,
        cancel.child_token(),
    )
    .await
    .map_err(|e| ParleyError::config(format!("presence task failed: {e}")))?;
    if let SubscriptionOutcome::Present { attempts } = outcome {
        info!(attempts, "Registry is present");
    }

    let launcher = Arc::new(MeshWorkerLauncher::new(
        mesh.clone(),
        Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        options.launch_delay,
        cancel.child_token(),
    ));
    let coordinator = Arc::new(StartupCoordinator::new(Arc::new(IdentityCache::new(
        config.identity.clone(),
    ))));
    let gateway = Arc::new(Gateway {
        me: me.clone(),
        registry,
        mesh: Arc::new(mesh.clone()),
        requests: RequestReplyChannel::new(
            me.clone(),
            Arc::new(mesh.clone()),
            gateway_inbox.listeners().clone(),
            config.request_reply.clone(),
        )
        .with_metrics(mesh.metrics().clone()),
        coordinator: Arc::clone(&coordinator),
        presence,
        launcher: Arc::clone(&launcher) as _,
        platform: Arc::clone(&platform) as _,
    });
    spawn_behaviour(gateway_behaviour()?, gateway, gateway_inbox, cancel.child_token());

    // Every event for every user at once
    let users = demo_users(options.users);
    let events: Vec<Message> = users
        .iter()
        .flat_map(|user| {
            (0..options.events_per_user).map(|n| {
                Message::new(me.clone(), format!("message {n}"))
                    .with_metadata(keys::PLATFORM, options.platform.as_str())
                    .with_metadata(keys::USER, user.as_str())
            })
        })
        .collect();
    let events_sent = events.len();
    for sent in join_all(events.into_iter().map(|event| mesh.send(event))).await {
        sent?;
    }

    // Each event ends in exactly one text to its user
    let wait = config.request_reply.default_timeout() + options.launch_delay;
    let completed = platform.wait_for_sent(events_sent, wait).await;
    if !completed {
        warn!(expected = events_sent, delivered = platform.sent(), "Demo timed out");
    }

    let workers_live = mesh
        .list_agents()
        .await?
        .into_iter()
        .filter(|agent| agent.as_str().starts_with("user-"))
        .map(|agent| agent.to_string())
        .collect();
    let report = DemoReport {
        events_sent,
        texts_delivered: platform.sent(),
        workers_launched: launcher.launches(),
        workers_live,
        completed,
    };

    coordinator.shutdown();
    cancel.cancel();
    Ok(report)
}

//! Gateway agent: turns platform chat events into worker conversations
//!
//! A known user's event goes straight to their worker, started on demand. An
//! unknown user is first looked up in the registry; the reply is handled off
//! the dispatcher so the gateway keeps serving other users meanwhile.

use async_trait::async_trait;
use parley::behaviour::BehaviourResult;
use parley::mesh::{MeshError, MessageMetadata, PresenceCheck};
use parley::{
    AgentId, AgentMesh, CacheKey, ControlSignal, Fsm, HandlerError, Identity, Message,
    ReplyHandler, RequestReplyChannel, StartupCoordinator, State, WorkerLauncher,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::platform::{ChatPlatform, GENERIC_ERROR};
use super::registry::keys;

pub const GATEWAY: &str = "gateway";

pub const SETTING_UP: &str = "Your account is being set up, please write again in a moment.";

/// Services the gateway states and reply handlers share
pub struct Gateway {
    pub me: AgentId,
    pub registry: AgentId,
    pub mesh: Arc<dyn AgentMesh>,
    pub requests: RequestReplyChannel,
    pub coordinator: Arc<StartupCoordinator>,
    pub presence: Arc<dyn PresenceCheck>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub platform: Arc<dyn ChatPlatform>,
}

impl Gateway {
    /// Make sure the user's worker runs, then hand it the event
    ///
    /// A worker that stopped after its launch is only noticed when the forward
    /// finds no mailbox; its startup is then forgotten and launched once more.
    pub(super) async fn deliver(self: Arc<Self>, key: CacheKey, event: Message) {
        for attempt in 0..2 {
            let Some(worker) = self.start_worker(&key).await else {
                self.platform.send_text(key.user(), GENERIC_ERROR).await;
                return;
            };

            let forwarded = event.clone().forward_to(worker.clone(), self.me.clone());
            match self.mesh.send(forwarded).await {
                Ok(()) => return,
                Err(MeshError::AgentNotFound(_)) if attempt == 0 => {
                    info!(key = %key, worker = %worker, "Worker gone, relaunching");
                    self.coordinator.forget_worker(&key);
                }
                Err(e) => {
                    warn!(key = %key, worker = %worker, error = %e, "Forwarding to worker failed");
                    self.platform.send_text(key.user(), GENERIC_ERROR).await;
                    return;
                }
            }
        }
    }

    async fn start_worker(&self, key: &CacheKey) -> Option<AgentId> {
        let started = self
            .coordinator
            .ensure_started(
                key,
                self.presence.as_ref(),
                self.platform.send_typing(key.user()),
                Arc::clone(&self.launcher),
            )
            .await;

        match started {
            Ok(outcome) => Some(outcome.worker().clone()),
            Err(e) => {
                warn!(key = %key, error = %e, "Worker unavailable");
                None
            }
        }
    }
}

/// Reply handler for a registry lookup made on behalf of one event
struct Registration {
    gateway: Arc<Gateway>,
    key: CacheKey,
    event: Message,
}

#[async_trait]
impl ReplyHandler for Registration {
    async fn on_result(&self, reply: Message) {
        info!(key = %self.key, identity = %reply.body, "User identified");
        self.gateway
            .coordinator
            .cache()
            .insert(self.key.clone(), Identity::new(reply.body));
        Arc::clone(&self.gateway)
            .deliver(self.key.clone(), self.event.clone())
            .await;
    }

    async fn on_unrecognized(&self, _reply: Message, performative: Option<String>) {
        if performative.as_deref() == Some("inform") {
            self.gateway
                .platform
                .send_text(self.key.user(), SETTING_UP)
                .await;
        } else {
            self.notify_generic_error().await;
        }
    }

    async fn notify_generic_error(&self) {
        self.gateway
            .platform
            .send_text(self.key.user(), GENERIC_ERROR)
            .await;
    }
}

struct CheckRegistration;

#[async_trait]
impl State<Arc<Gateway>> for CheckRegistration {
    fn name(&self) -> &str {
        "check_registration"
    }

    async fn on_message(
        &mut self,
        gateway: &mut Arc<Gateway>,
        event: Message,
    ) -> Result<ControlSignal, HandlerError> {
        let Some(user) = event.get_metadata(keys::USER).map(str::to_string) else {
            debug!(id = %event.id, "Dropping message without user");
            return Ok(ControlSignal::Stay);
        };
        let platform = event
            .get_metadata(keys::PLATFORM)
            .unwrap_or(gateway.platform.name())
            .to_string();
        let key = CacheKey::new(platform.clone(), user.clone());

        if gateway.coordinator.cache().get(&key).is_some() {
            tokio::spawn(Arc::clone(gateway).deliver(key, event));
            return Ok(ControlSignal::Stay);
        }

        let mut lookup = MessageMetadata::new();
        lookup.insert(keys::PLATFORM.to_string(), platform);
        lookup.insert(keys::USER.to_string(), user.clone());
        let pending = match gateway
            .requests
            .request(gateway.registry.clone(), "", lookup)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                gateway.platform.send_text(&user, GENERIC_ERROR).await;
                return Err(e.into());
            }
        };

        debug!(key = %key, token = %pending.token(), "Looking up user in registry");
        pending.dispatch(Registration {
            gateway: Arc::clone(gateway),
            key,
            event,
        });
        Ok(ControlSignal::Stay)
    }
}

pub fn gateway_behaviour() -> BehaviourResult<Fsm<Arc<Gateway>>> {
    let mut fsm = Fsm::new(GATEWAY);
    fsm.add_state(CheckRegistration, true)?;
    Ok(fsm)
}

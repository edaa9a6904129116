//! Registry agent: maps platform users to internal identities

use async_trait::async_trait;
use parley::behaviour::BehaviourResult;
use parley::mesh::patterns::{failure, inform, inform_result};
use parley::{AgentId, AgentMesh, ControlSignal, Fsm, HandlerError, Message, Performative, State};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const REGISTRY: &str = "registry";

/// Metadata keys carried by chat events and registry lookups
pub mod keys {
    pub const PLATFORM: &str = "platform";
    pub const USER: &str = "user";
}

/// Users the registry refuses or has not finished setting up
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub blocked: HashSet<String>,
    pub pending: HashSet<String>,
}

pub struct RegistryCtx {
    me: AgentId,
    mesh: Arc<dyn AgentMesh>,
    directory: Directory,
    assigned: HashMap<(String, String), String>,
}

impl RegistryCtx {
    pub fn new(mesh: Arc<dyn AgentMesh>, directory: Directory) -> Self {
        Self {
            me: AgentId::new_unchecked(REGISTRY),
            mesh,
            directory,
            assigned: HashMap::new(),
        }
    }

    /// Identity of a user, assigned on first lookup
    fn identity_of(&mut self, platform: &str, user: &str) -> String {
        let next = self.assigned.len() + 1;
        self.assigned
            .entry((platform.to_string(), user.to_string()))
            .or_insert_with(|| {
                info!(platform, user, "Registered new user");
                format!("u-{next}")
            })
            .clone()
    }
}

struct Answering;

#[async_trait]
impl State<RegistryCtx> for Answering {
    fn name(&self) -> &str {
        "answering"
    }

    async fn on_message(
        &mut self,
        ctx: &mut RegistryCtx,
        message: Message,
    ) -> Result<ControlSignal, HandlerError> {
        if message.performative() != Some(Performative::Request) {
            debug!(id = %message.id, "Ignoring non-request message");
            return Ok(ControlSignal::Stay);
        }

        let (Some(platform), Some(user)) = (
            message.get_metadata(keys::PLATFORM),
            message.get_metadata(keys::USER),
        ) else {
            let reply = failure(&message, &ctx.me, "missing platform or user")?;
            ctx.mesh.send(reply).await?;
            return Ok(ControlSignal::Stay);
        };
        let (platform, user) = (platform.to_string(), user.to_string());

        let reply = if ctx.directory.blocked.contains(&user) {
            failure(&message, &ctx.me, format!("user {user} is blocked"))?
        } else if ctx.directory.pending.contains(&user) {
            inform(&message, &ctx.me, "registration in progress")?
        } else {
            let identity = ctx.identity_of(&platform, &user);
            inform_result(&message, &ctx.me, identity)?
        };
        ctx.mesh.send(reply).await?;
        Ok(ControlSignal::Stay)
    }
}

pub fn registry_behaviour() -> BehaviourResult<Fsm<RegistryCtx>> {
    let mut fsm = Fsm::new(REGISTRY);
    fsm.add_state(Answering, true)?;
    Ok(fsm)
}

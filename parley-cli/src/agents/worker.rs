//! Per-user worker agent

use async_trait::async_trait;
use parley::behaviour::BehaviourResult;
use parley::{ControlSignal, Fsm, HandlerError, Identity, Message, State};
use std::sync::Arc;

use super::platform::ChatPlatform;
use super::registry::keys;

pub struct WorkerCtx {
    pub identity: Identity,
    pub platform: Arc<dyn ChatPlatform>,
    pub handled: usize,
}

impl WorkerCtx {
    pub fn new(identity: Identity, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            identity,
            platform,
            handled: 0,
        }
    }
}

fn user_of(message: &Message) -> Result<&str, HandlerError> {
    message
        .get_metadata(keys::USER)
        .ok_or_else(|| HandlerError::rejected("chat event without user"))
}

/// First message of a conversation
struct Greeting;

#[async_trait]
impl State<WorkerCtx> for Greeting {
    fn name(&self) -> &str {
        "greeting"
    }

    async fn on_message(
        &mut self,
        ctx: &mut WorkerCtx,
        message: Message,
    ) -> Result<ControlSignal, HandlerError> {
        let user = user_of(&message)?;
        ctx.handled += 1;
        ctx.platform
            .send_text(user, &format!("Hello {}, you said: {}", ctx.identity, message.body))
            .await;
        Ok(ControlSignal::go_to("chatting"))
    }
}

struct Chatting;

#[async_trait]
impl State<WorkerCtx> for Chatting {
    fn name(&self) -> &str {
        "chatting"
    }

    async fn on_message(
        &mut self,
        ctx: &mut WorkerCtx,
        message: Message,
    ) -> Result<ControlSignal, HandlerError> {
        let user = user_of(&message)?;
        ctx.handled += 1;
        ctx.platform
            .send_text(user, &format!("You said: {}", message.body))
            .await;
        Ok(ControlSignal::Stay)
    }
}

pub fn worker_behaviour(name: &str) -> BehaviourResult<Fsm<WorkerCtx>> {
    let mut fsm = Fsm::new(name);
    fsm.add_state(Greeting, true)?;
    fsm.add_state(Chatting, false)?;
    fsm.add_chain_transitions(&["greeting", "chatting"])?;
    Ok(fsm)
}

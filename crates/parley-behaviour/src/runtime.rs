//! Running a behaviour as its own task

use parley_mesh::Inbox;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info_span};

use crate::{error::BehaviourResult, fsm::Fsm};

/// A behaviour running in the background
pub struct BehaviourHandle<C> {
    task: JoinHandle<(BehaviourResult<()>, C)>,
    cancel: CancellationToken,
}

impl<C> BehaviourHandle<C> {
    /// Ask the behaviour to stop after the message it is handling
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the behaviour to end and get its context back
    ///
    /// Returns `None` if the task itself was aborted.
    pub async fn join(self) -> Option<(BehaviourResult<()>, C)> {
        self.task.await.ok()
    }
}

/// Run `fsm` over `inbox` in a new task, inside an `agent` tracing span
///
/// The behaviour ends when `cancel` fires, when the inbox closes, or on an
/// invalid transition.
pub fn spawn_behaviour<C>(
    mut fsm: Fsm<C>,
    mut ctx: C,
    mut inbox: Inbox,
    cancel: CancellationToken,
) -> BehaviourHandle<C>
where
    C: Send + 'static,
{
    let span = info_span!("agent", agent = %inbox.agent(), fsm = %fsm.name());
    let task_cancel = cancel.clone();

    let task = tokio::spawn(
        async move {
            let result = fsm.run(&mut ctx, &mut inbox, &task_cancel).await;
            if let Err(e) = &result {
                error!(error = %e, "Behaviour aborted");
            }
            inbox.close().await;
            (result, ctx)
        }
        .instrument(span),
    );

    BehaviourHandle { task, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BehaviourError, HandlerError};
    use crate::state::{ControlSignal, State};
    use async_trait::async_trait;
    use parley_mesh::{AgentId, AgentMesh, InMemoryMesh, Message, Template};

    struct Collect;

    #[async_trait]
    impl State<Vec<String>> for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        async fn on_message(
            &mut self,
            seen: &mut Vec<String>,
            message: Message,
        ) -> Result<ControlSignal, HandlerError> {
            seen.push(message.body.clone());
            if message.body == "jump" {
                return Ok(ControlSignal::go_to("nowhere"));
            }
            Ok(ControlSignal::Stay)
        }
    }

    async fn spawn(mesh: &InMemoryMesh, cancel: CancellationToken) -> BehaviourHandle<Vec<String>> {
        let inbox = Inbox::connect(
            mesh,
            AgentId::new_unchecked("worker"),
            Template::any(),
            mesh.metrics().clone(),
            cancel.clone(),
        )
        .await
        .unwrap();
        let mut fsm = Fsm::new("worker");
        fsm.add_state(Collect, true).unwrap();
        spawn_behaviour(fsm, Vec::new(), inbox, cancel)
    }

    #[tokio::test]
    async fn test_processes_in_arrival_order_until_inbox_closes() {
        let mesh = InMemoryMesh::default();
        let handle = spawn(&mesh, CancellationToken::new()).await;

        for n in 0..20 {
            mesh.send(Message::new(AgentId::new_unchecked("worker"), n.to_string()))
                .await
                .unwrap();
        }

        // Closing the mailbox drains what is queued, then ends the behaviour
        mesh.disconnect(&AgentId::new_unchecked("worker")).await.unwrap();

        let (result, seen) = handle.join().await.unwrap();
        assert!(result.is_ok());
        let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_invalid_transition_ends_behaviour() {
        let mesh = InMemoryMesh::default();
        let handle = spawn(&mesh, CancellationToken::new()).await;

        mesh.send(Message::new(AgentId::new_unchecked("worker"), "jump"))
            .await
            .unwrap();

        let (result, _) = handle.join().await.unwrap();
        assert!(matches!(
            result,
            Err(BehaviourError::InvalidTransition { .. })
        ));
        assert!(!mesh.is_reachable(&AgentId::new_unchecked("worker")).await);
    }

    #[tokio::test]
    async fn test_stop_ends_idle_behaviour() {
        let mesh = InMemoryMesh::default();
        let handle = spawn(&mesh, CancellationToken::new()).await;

        handle.stop();
        let (result, seen) = handle.join().await.unwrap();
        assert!(result.is_ok());
        assert!(seen.is_empty());
    }
}


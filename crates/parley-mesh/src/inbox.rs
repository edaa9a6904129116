//! Per-agent inbox: routes an agent's mailbox to listeners and to its behaviour
//!
//! Every inbound message is offered to the registered listeners in
//! registration order and the first match claims it. One-shot listeners are
//! removed in the same critical section that delivers to them, so a second
//! message with the same correlation token can never reach the same waiter.
//! Messages no listener claims go to the behaviour queue when they match the
//! base template, and are dropped otherwise.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::MeshResult, mesh::AgentMesh, message::Message, metrics::MeshMetricsCollector,
    template::Template, types::AgentId,
};

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Sink {
    Once(oneshot::Sender<Message>),
    Persistent(mpsc::UnboundedSender<Message>),
}

struct Listener {
    id: ListenerId,
    template: Template,
    sink: Sink,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Shared registry of template listeners for one agent
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<Mutex<ListenerTable>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerTable> {
        // The table holds no invariant a panicking holder could break halfway
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, template: Template, sink: Sink) -> ListenerId {
        let mut table = self.lock();
        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.listeners.push(Listener { id, template, sink });
        id
    }

    /// Register a listener that receives the first matching message, then retires
    pub fn register_once(&self, template: Template) -> (ListenerId, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        (self.insert(template, Sink::Once(tx)), rx)
    }

    /// Register a listener that keeps receiving matching messages until unregistered
    pub fn register(&self, template: Template) -> (ListenerId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(template, Sink::Persistent(tx)), rx)
    }

    /// Remove a listener. Returns `false` if it already fired or was removed.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut table = self.lock();
        let before = table.listeners.len();
        table.listeners.retain(|l| l.id != id);
        table.listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) {
        self.lock().listeners.clear();
    }

    /// Offer `message` to the listeners. Gives the message back when nobody claims it.
    pub(crate) fn route(&self, message: Message) -> Result<ListenerId, Message> {
        let mut table = self.lock();
        let mut message = message;
        let mut index = 0;

        while index < table.listeners.len() {
            if !table.listeners[index].template.matches(&message) {
                index += 1;
                continue;
            }

            let listener = &table.listeners[index];
            let id = listener.id;
            match &listener.sink {
                Sink::Persistent(tx) => match tx.send(message) {
                    Ok(()) => return Ok(id),
                    Err(mpsc::error::SendError(returned)) => {
                        // Receiver went away: drop the stale listener and keep looking
                        message = returned;
                        table.listeners.remove(index);
                    }
                },
                Sink::Once(_) => {
                    let Listener { sink, .. } = table.listeners.remove(index);
                    let Sink::Once(tx) = sink else {
                        unreachable!("sink kind checked above")
                    };
                    match tx.send(message) {
                        Ok(()) => return Ok(id),
                        Err(returned) => message = returned,
                    }
                }
            }
        }

        Err(message)
    }
}

/// Receiving side of an agent: the behaviour queue plus its listener registry
pub struct Inbox {
    agent: AgentId,
    queue: mpsc::UnboundedReceiver<Message>,
    listeners: ListenerRegistry,
    router: JoinHandle<()>,
    stop: CancellationToken,
}

impl Inbox {
    /// Open `agent`'s mailbox on `mesh` and start routing it.
    ///
    /// `base_template` selects the messages meant for the agent's behaviour.
    /// Routing stops when `cancel` fires, when [`close`](Self::close) is called, or
    /// when the mailbox is disconnected.
    pub async fn connect<M>(
        mesh: &M,
        agent: AgentId,
        base_template: Template,
        metrics: MeshMetricsCollector,
        cancel: CancellationToken,
    ) -> MeshResult<Self>
    where
        M: AgentMesh + ?Sized,
    {
        let mut stream = mesh.connect(&agent).await?;
        let listeners = ListenerRegistry::new();
        // The behaviour queue is unbounded so a behaviour waiting on a reply can
        // never block routing of that reply; the mailbox upstream is bounded.
        let (tx, queue) = mpsc::unbounded_channel();
        let stop = cancel.child_token();

        let router = {
            let listeners = listeners.clone();
            let stop = stop.clone();
            let agent = agent.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        next = stream.next() => match next {
                            Some(message) => message,
                            None => break,
                        },
                    };

                    match listeners.route(message) {
                        Ok(listener) => {
                            trace!(agent = %agent, ?listener, "Message claimed by listener");
                            metrics.record_listener_delivery().await;
                        }
                        Err(message) if base_template.matches(&message) => {
                            debug!(
                                agent = %agent,
                                id = %message.id,
                                "Message queued for behaviour"
                            );
                            if tx.send(message).is_err() {
                                debug!(agent = %agent, "Behaviour queue closed");
                            } else {
                                metrics.record_behaviour_delivery().await;
                            }
                        }
                        Err(message) => {
                            debug!(
                                agent = %agent,
                                id = %message.id,
                                "Dropping message matching no template"
                            );
                            metrics.record_unmatched().await;
                        }
                    }
                }

                // Outstanding waiters observe a closed channel instead of hanging
                listeners.clear();
                debug!(agent = %agent, "Inbox router stopped");
            })
        };

        Ok(Self {
            agent,
            queue,
            listeners,
            router,
            stop,
        })
    }

    /// Agent this inbox belongs to
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Listener registry of this agent
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Wait for the next behaviour message.
    ///
    /// `None` as timeout waits indefinitely without polling. Returns `None` on
    /// timeout or once routing has stopped and the queue is drained.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            None => self.queue.recv().await,
            Some(limit) => tokio::time::timeout(limit, self.queue.recv())
                .await
                .ok()
                .flatten(),
        }
    }

    /// Stop routing and wait for the router to finish
    pub async fn close(self) {
        self.stop.cancel();
        let _ = self.router.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMesh;
    use crate::message::fields;

    fn id(s: &str) -> AgentId {
        AgentId::new_unchecked(s)
    }

    async fn inbox(mesh: &InMemoryMesh, agent: &str, base: Template) -> Inbox {
        Inbox::connect(
            mesh,
            id(agent),
            base,
            mesh.metrics().clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_route_first_match_wins_in_registration_order() {
        let registry = ListenerRegistry::new();
        let (first, mut rx1) = registry.register_once(Template::correlation("t"));
        let (_second, mut rx2) = registry.register_once(Template::any());

        let msg = Message::new(id("a"), "").with_metadata(fields::REQUEST_CODE, "t");
        assert_eq!(registry.route(msg).unwrap(), first);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let registry = ListenerRegistry::new();
        let (_id, _rx) = registry.register_once(Template::correlation("t"));

        let msg = Message::new(id("a"), "").with_metadata(fields::REQUEST_CODE, "t");
        assert!(registry.route(msg.clone()).is_ok());
        assert!(registry.route(msg).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = ListenerRegistry::new();
        let (listener, _rx) = registry.register(Template::any());
        assert!(registry.unregister(listener));
        assert!(!registry.unregister(listener));
        assert!(registry.route(Message::new(id("a"), "")).is_err());
    }

    #[test]
    fn test_stale_listener_is_skipped() {
        let registry = ListenerRegistry::new();
        let (_stale, rx) = registry.register_once(Template::any());
        drop(rx);
        let (live, mut live_rx) = registry.register(Template::any());

        assert_eq!(registry.route(Message::new(id("a"), "x")).unwrap(), live);
        assert_eq!(live_rx.try_recv().unwrap().body, "x");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_inbox_splits_listener_and_behaviour_traffic() {
        let mesh = InMemoryMesh::default();
        let base = Template::any().with_metadata("kind", "chat");
        let mut inbox = inbox(&mesh, "gateway", base).await;
        let (_listener, reply) = inbox.listeners().register_once(Template::correlation("tok"));

        mesh.send(Message::new(id("gateway"), "chat").with_metadata("kind", "chat"))
            .await
            .unwrap();
        mesh.send(Message::new(id("gateway"), "reply").with_metadata(fields::REQUEST_CODE, "tok"))
            .await
            .unwrap();
        mesh.send(Message::new(id("gateway"), "noise")).await.unwrap();

        assert_eq!(reply.await.unwrap().body, "reply");
        assert_eq!(inbox.receive(None).await.unwrap().body, "chat");
        assert!(
            inbox
                .receive(Some(Duration::from_millis(50)))
                .await
                .is_none()
        );

        let metrics = mesh.metrics().snapshot().await;
        assert_eq!(metrics.listener_deliveries_total, 1);
        assert_eq!(metrics.behaviour_deliveries_total, 1);
        assert_eq!(metrics.unmatched_total, 1);
    }

    #[tokio::test]
    async fn test_close_releases_pending_listeners() {
        let mesh = InMemoryMesh::default();
        let inbox = inbox(&mesh, "gateway", Template::any()).await;
        let (_listener, reply) = inbox.listeners().register_once(Template::correlation("never"));
        let listeners = inbox.listeners().clone();

        inbox.close().await;
        assert!(reply.await.is_err());
        assert!(listeners.is_empty());
    }
}

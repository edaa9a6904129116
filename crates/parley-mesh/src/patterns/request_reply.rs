//! Correlated request/reply over the mesh
//!
//! Every request carries a fresh `request_code`. A one-shot listener keyed by
//! that code is registered on the caller's inbox before the request leaves, so
//! a reply can never arrive ahead of its waiter. The listener is removed on
//! delivery, on timeout and when the [`PendingReply`] is dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{MeshError, MeshResult},
    inbox::{ListenerId, ListenerRegistry},
    mesh::AgentMesh,
    message::{Message, MessageMetadata, Performative, fields},
    metrics::MeshMetricsCollector,
    template::Template,
    types::AgentId,
};

/// Configuration for correlated requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestReplyConfig {
    /// Time to wait for a reply, in milliseconds
    pub default_timeout_ms: u64,
    /// Maximum number of requests awaiting a reply at once
    pub max_pending: usize,
}

impl Default for RequestReplyConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_pending: 1000,
        }
    }
}

impl RequestReplyConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Request side of the correlated request/reply exchange for one agent
#[derive(Clone)]
pub struct RequestReplyChannel {
    me: AgentId,
    mesh: Arc<dyn AgentMesh>,
    listeners: ListenerRegistry,
    config: RequestReplyConfig,
    pending: Arc<AtomicUsize>,
    metrics: MeshMetricsCollector,
}

impl RequestReplyChannel {
    /// Create a channel sending as `me` and waiting on `listeners`
    ///
    /// `listeners` must belong to the inbox of `me`, otherwise replies are never seen.
    pub fn new(
        me: AgentId,
        mesh: Arc<dyn AgentMesh>,
        listeners: ListenerRegistry,
        config: RequestReplyConfig,
    ) -> Self {
        Self {
            me,
            mesh,
            listeners,
            config,
            pending: Arc::new(AtomicUsize::new(0)),
            metrics: MeshMetricsCollector::default(),
        }
    }

    /// Report request counters into `metrics`
    pub fn with_metrics(mut self, metrics: MeshMetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Requests sent and not yet settled
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Send a `request` to `to` and return a handle on its reply
    ///
    /// The message is stamped with the `request` performative, `sender = me` and a
    /// fresh `request_code`; those stamps win over same-named keys in `metadata`.
    ///
    /// # Errors
    ///
    /// `MeshError::QueueFull` when `max_pending` requests are already outstanding,
    /// or whatever the transport reports for the send.
    pub async fn request(
        &self,
        to: AgentId,
        body: impl Into<String>,
        metadata: MessageMetadata,
    ) -> MeshResult<PendingReply> {
        let max = self.config.max_pending;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|current| MeshError::QueueFull {
                capacity: max,
                current,
            })?;
        let slot = PendingSlot(Arc::clone(&self.pending));

        let token = Uuid::new_v4().to_string();
        let (listener, reply) = self
            .listeners
            .register_once(Template::correlation(token.clone()));

        let pending = PendingReply {
            token: token.clone(),
            to: to.clone(),
            listener,
            reply,
            listeners: self.listeners.clone(),
            default_timeout: self.config.default_timeout(),
            sent_at: Instant::now(),
            metrics: self.metrics.clone(),
            _slot: slot,
        };

        let message = Message::new(to.clone(), body)
            .with_metadata_map(metadata)
            .with_sender(self.me.clone())
            .with_performative(Performative::Request)
            .with_metadata(fields::REQUEST_CODE, token.as_str());

        // On failure `pending` is dropped here, which unregisters the listener
        self.mesh.send(message).await?;

        debug!(from = %self.me, to = %to, token = %token, "Request sent");
        self.metrics.record_request().await;
        Ok(pending)
    }
}

/// Releases one pending-request slot when dropped
struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outstanding request awaiting its reply
pub struct PendingReply {
    token: String,
    to: AgentId,
    listener: ListenerId,
    reply: oneshot::Receiver<Message>,
    listeners: ListenerRegistry,
    default_timeout: Duration,
    sent_at: Instant,
    metrics: MeshMetricsCollector,
    _slot: PendingSlot,
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("token", &self.token)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl PendingReply {
    /// Correlation token carried by the request
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the reply using the configured default timeout
    pub async fn wait(self) -> MeshResult<Message> {
        let timeout = self.default_timeout;
        self.wait_for(timeout).await
    }

    /// Wait for the reply for at most `timeout`
    ///
    /// # Errors
    ///
    /// `MeshError::Timeout` when no reply arrived in time, `MeshError::ReceiveFailed`
    /// when the inbox stopped routing first.
    pub async fn wait_for(mut self, timeout: Duration) -> MeshResult<Message> {
        match tokio::time::timeout(timeout, &mut self.reply).await {
            Ok(Ok(reply)) => {
                let elapsed = self.sent_at.elapsed().as_millis() as u64;
                debug!(token = %self.token, elapsed_ms = elapsed, "Reply received");
                self.metrics.record_reply_latency(elapsed).await;
                Ok(reply)
            }
            Ok(Err(_)) => Err(MeshError::ReceiveFailed(format!(
                "inbox closed before reply to {}",
                self.token
            ))),
            Err(_) => {
                self.listeners.unregister(self.listener);
                warn!(to = %self.to, token = %self.token, ?timeout, "Request timed out");
                self.metrics.record_request_timeout().await;
                Err(MeshError::Timeout(timeout))
            }
        }
    }

    /// Wait for the reply in its own task and hand the outcome to `handler`
    pub fn dispatch<H>(self, handler: H) -> JoinHandle<()>
    where
        H: ReplyHandler + 'static,
    {
        tokio::spawn(async move {
            match self.wait().await {
                Ok(reply) => ReplyOutcome::classify(reply).deliver(&handler).await,
                Err(MeshError::Timeout(after)) => handler.on_timeout(after).await,
                Err(e) => {
                    warn!(error = %e, "Reply lost");
                    handler.notify_generic_error().await;
                }
            }
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.listeners.unregister(self.listener);
    }
}

/// A reply sorted by its performative
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// `inform-result`: the request succeeded
    Result(Message),
    /// `failure`, with the remote `fail_message` (empty when absent)
    Failure { reply: Message, reason: String },
    /// Any other performative, or none at all
    Unrecognized {
        reply: Message,
        performative: Option<String>,
    },
}

impl ReplyOutcome {
    pub fn classify(reply: Message) -> Self {
        match reply.performative() {
            Some(Performative::InformResult) => ReplyOutcome::Result(reply),
            Some(Performative::Failure) => {
                let reason = reply.fail_message().unwrap_or_default().to_string();
                ReplyOutcome::Failure { reply, reason }
            }
            _ => {
                let performative = reply.performative_raw().map(str::to_string);
                ReplyOutcome::Unrecognized {
                    reply,
                    performative,
                }
            }
        }
    }

    /// Route this outcome to the matching hook of `handler`
    pub async fn deliver<H>(self, handler: &H)
    where
        H: ReplyHandler + ?Sized,
    {
        match self {
            ReplyOutcome::Result(reply) => handler.on_result(reply).await,
            ReplyOutcome::Failure { reply, reason } => {
                warn!(reason = %reason, "Remote agent reported failure");
                handler.on_failure(reply, reason).await
            }
            ReplyOutcome::Unrecognized {
                reply,
                performative,
            } => {
                warn!(?performative, "Reply with unexpected performative");
                handler.on_unrecognized(reply, performative).await
            }
        }
    }
}

/// Reacts to the reply of a correlated request
///
/// Only `on_result` and `notify_generic_error` are required; the failure hooks
/// fall back to the generic error notification.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn on_result(&self, reply: Message);

    async fn on_failure(&self, _reply: Message, _reason: String) {
        self.notify_generic_error().await;
    }

    async fn on_unrecognized(&self, _reply: Message, _performative: Option<String>) {
        self.notify_generic_error().await;
    }

    async fn on_timeout(&self, _after: Duration) {
        self.notify_generic_error().await;
    }

    /// Tell the end user something went wrong without details
    async fn notify_generic_error(&self);
}

/// Build a reply to `request` sent by `from`
pub fn reply_to(
    request: &Message,
    from: &AgentId,
    performative: Performative,
    body: impl Into<String>,
) -> MeshResult<Message> {
    request
        .reply(from.clone(), performative, body)
        .ok_or_else(|| MeshError::NoReplyAddress(request.id.to_string()))
}

/// `inform-result` reply carrying `body`
pub fn inform_result(
    request: &Message,
    from: &AgentId,
    body: impl Into<String>,
) -> MeshResult<Message> {
    reply_to(request, from, Performative::InformResult, body)
}

/// `inform` reply carrying `body`
pub fn inform(request: &Message, from: &AgentId, body: impl Into<String>) -> MeshResult<Message> {
    reply_to(request, from, Performative::Inform, body)
}

/// `failure` reply carrying `reason` in `fail_message`
pub fn failure(
    request: &Message,
    from: &AgentId,
    reason: impl Into<String>,
) -> MeshResult<Message> {
    request
        .failure_reply(from.clone(), reason)
        .ok_or_else(|| MeshError::NoReplyAddress(request.id.to_string()))
}

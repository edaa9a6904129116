//! Presence capabilities and the subscribe-until-present task

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::MeshResult, types::AgentId};

/// Reports whether an agent is currently reachable
#[async_trait]
pub trait PresenceCheck: Send + Sync {
    async fn is_live(&self, agent: &AgentId) -> bool;
}

/// Presence capability that can also ask to follow another agent's presence
#[async_trait]
pub trait PresenceSubscriber: PresenceCheck {
    /// Ask to be notified of `target`'s presence. Repeating the call is harmless.
    async fn subscribe(&self, target: &AgentId) -> MeshResult<()>;
}

/// Configuration for the subscribe-until-present task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay between two presence checks, in milliseconds
    pub retry_period_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            retry_period_ms: 2_000,
        }
    }
}

impl SubscriptionConfig {
    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period_ms = period.as_millis() as u64;
        self
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms.max(1))
    }
}

/// How a subscribe-until-present task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// The target became live after `attempts` subscribe calls
    Present { attempts: u32 },
    /// The task was cancelled before the target became live
    Cancelled { attempts: u32 },
}

/// Periodically subscribe to `target` until it is live, then stop.
///
/// The first check runs immediately. Once the liveness check succeeds no
/// further subscribe call is made and the task ends on its own.
pub fn spawn_subscribe_until_present<S>(
    subscriber: Arc<S>,
    target: AgentId,
    config: &SubscriptionConfig,
    cancel: CancellationToken,
) -> JoinHandle<SubscriptionOutcome>
where
    S: PresenceSubscriber + ?Sized + 'static,
{
    let period = config.retry_period();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target_agent = %target, attempts, "Presence subscription cancelled");
                    return SubscriptionOutcome::Cancelled { attempts };
                }
                _ = interval.tick() => {}
            }

            if subscriber.is_live(&target).await {
                info!(
                    target_agent = %target,
                    attempts,
                    "Contact is present, stopping subscription retries"
                );
                return SubscriptionOutcome::Present { attempts };
            }

            attempts = attempts.saturating_add(1);
            debug!(target_agent = %target, attempts, "Contact not present, subscribing");
            if let Err(e) = subscriber.subscribe(&target).await {
                warn!(target_agent = %target, error = %e, "Presence subscription attempt failed");
            }
        }
    })
}

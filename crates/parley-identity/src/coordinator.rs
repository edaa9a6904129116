//! Single-flight worker startup
//!
//! [`StartupCoordinator::ensure_started`] makes sure the worker of a cached
//! user is running, launching it at most once no matter how many callers ask
//! at the same time. The check for an existing startup and the installation of
//! a new one happen under the cache's shard lock, so two callers can never both
//! decide to launch.

use async_trait::async_trait;
use futures::FutureExt;
use parley_mesh::{AgentId, PresenceCheck};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::{IdentityCache, Startup, StartupFuture},
    error::{IdentityError, IdentityResult, LaunchError},
    key::{CacheKey, Identity},
};

/// Starts the worker agent of a user
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Address the worker of `identity` lives at
    fn worker_id(&self, identity: &Identity) -> AgentId;

    /// Create and start the worker. May be slow.
    async fn start(&self, key: &CacheKey, identity: &Identity) -> Result<AgentId, LaunchError>;
}

/// How `ensure_started` satisfied the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The worker was already reachable; nothing was launched
    AlreadyLive(AgentId),
    /// The worker came from a launch, started by this caller or a concurrent one
    Launched(AgentId),
}

impl StartOutcome {
    pub fn worker(&self) -> &AgentId {
        match self {
            StartOutcome::AlreadyLive(worker) | StartOutcome::Launched(worker) => worker,
        }
    }
}

/// Settles one startup slot when its launch task ends
///
/// A failed launch clears the slot before the outcome is published; every
/// launch marks the slot done, also when the task unwinds or is aborted.
struct LaunchSettle {
    cache: Arc<IdentityCache>,
    key: CacheKey,
    generation: u64,
    done: Arc<AtomicBool>,
    launched: bool,
}

impl Drop for LaunchSettle {
    fn drop(&mut self) {
        if !self.launched {
            self.cache.clear_startup(&self.key, self.generation);
        }
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Coordinates worker launches for the users of an [`IdentityCache`]
pub struct StartupCoordinator {
    cache: Arc<IdentityCache>,
    generation: AtomicU64,
    cancel: CancellationToken,
}

impl StartupCoordinator {
    pub fn new(cache: Arc<IdentityCache>) -> Self {
        Self {
            cache,
            generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Make sure the worker of `key` is running
    ///
    /// 1. If `presence` reports the worker live, return at once.
    /// 2. Otherwise await `before_create`. Every caller runs it, so it must be
    ///    safe to repeat.
    /// 3. Join the startup in flight for `key`, or launch one if there is none.
    /// 4. Return the launch outcome; every joined caller gets the same one.
    ///
    /// A failed launch clears the startup before the failure is reported, so
    /// the next call retries. A successful launch is remembered until
    /// [`forget_worker`](Self::forget_worker).
    ///
    /// # Errors
    ///
    /// `IdentityError::UnknownKey` when no identity is cached for `key`, and
    /// `IdentityError::Launch` when the launch failed.
    pub async fn ensure_started<P, B, L>(
        &self,
        key: &CacheKey,
        presence: &P,
        before_create: B,
        launcher: Arc<L>,
    ) -> IdentityResult<StartOutcome>
    where
        P: PresenceCheck + ?Sized,
        B: Future<Output = ()> + Send,
        L: WorkerLauncher + ?Sized + 'static,
    {
        let identity = self
            .cache
            .get(key)
            .ok_or_else(|| IdentityError::UnknownKey(key.to_string()))?;

        let worker = launcher.worker_id(&identity);
        if presence.is_live(&worker).await {
            debug!(key = %key, worker = %worker, "Worker already live");
            return Ok(StartOutcome::AlreadyLive(worker));
        }

        before_create.await;

        let startup = self.join_or_launch(key, launcher)?;
        let worker = startup.await?;
        Ok(StartOutcome::Launched(worker))
    }

    fn join_or_launch<L>(&self, key: &CacheKey, launcher: Arc<L>) -> IdentityResult<StartupFuture>
    where
        L: WorkerLauncher + ?Sized + 'static,
    {
        self.cache
            .with_entry(key, |entry| {
                if let Some(startup) = &entry.startup {
                    debug!(key = %key, "Joining worker startup in flight");
                    return startup.future.clone();
                }

                let settle = LaunchSettle {
                    cache: Arc::clone(&self.cache),
                    key: key.clone(),
                    generation: self.generation.fetch_add(1, Ordering::SeqCst),
                    done: Arc::new(AtomicBool::new(false)),
                    launched: false,
                };
                let generation = settle.generation;
                let done = Arc::clone(&settle.done);
                let future = self.spawn_launch(entry.identity.clone(), settle, launcher);
                entry.startup = Some(Startup {
                    generation,
                    future: future.clone(),
                    done,
                });
                future
            })
            .ok_or_else(|| IdentityError::UnknownKey(key.to_string()))
    }

    fn spawn_launch<L>(
        &self,
        identity: Identity,
        mut settle: LaunchSettle,
        launcher: Arc<L>,
    ) -> StartupFuture
    where
        L: WorkerLauncher + ?Sized + 'static,
    {
        let cancel = self.cancel.child_token();

        // The slot is settled inside the task, so it holds even when every
        // caller stopped waiting or the launcher panicked
        let task = tokio::spawn(async move {
            let key = settle.key.clone();
            info!(key = %key, identity = %identity, "Launching worker");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LaunchError::Cancelled),
                result = launcher.start(&key, &identity) => result,
            };

            match &result {
                Ok(worker) => {
                    info!(key = %key, worker = %worker, "Worker launched");
                    settle.launched = true;
                }
                Err(e) => warn!(key = %key, error = %e, "Worker launch failed"),
            }
            drop(settle);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(LaunchError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }

    /// Forget a finished startup of `key` so the next call launches again
    ///
    /// Call it when the worker is known to have stopped. A startup still in
    /// flight is left alone. Returns whether anything was cleared.
    pub fn forget_worker(&self, key: &CacheKey) -> bool {
        let cleared = self.cache.clear_finished_startup(key);
        if cleared {
            debug!(key = %key, "Forgot worker startup");
        }
        cleared
    }

    /// Cancel every launch in flight; their waiters get `LaunchError::Cancelled`
    pub fn shutdown(&self) {
        info!("Cancelling worker launches");
        self.cancel.cancel();
    }
}

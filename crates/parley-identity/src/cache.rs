//! Identity cache keyed by platform user
//!
//! Each entry holds the internal identity of a platform user and, once a
//! worker start was requested, the shared startup future for that user. An
//! entry whose startup is still pending is never evicted or replaced.

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use parley_mesh::AgentId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::{IdentityError, IdentityResult, LaunchError},
    key::{CacheKey, Identity},
};

pub(crate) type StartupFuture = Shared<BoxFuture<'static, Result<AgentId, LaunchError>>>;

/// Cache bounds. `None` leaves a dimension unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityCacheConfig {
    /// Maximum number of cached users
    pub max_entries: Option<usize>,
    /// Evict users not seen for this many seconds
    pub ttl_secs: Option<u64>,
}

impl Default for IdentityCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(10_000),
            ttl_secs: None,
        }
    }
}

impl IdentityCacheConfig {
    /// No size or age bound
    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            ttl_secs: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

pub(crate) struct Startup {
    pub(crate) generation: u64,
    pub(crate) future: StartupFuture,
    /// Set by the launch task when it ends, whether or not anyone awaits `future`
    pub(crate) done: Arc<AtomicBool>,
}

impl Startup {
    fn is_pending(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }
}

pub(crate) struct CacheEntry {
    pub(crate) identity: Identity,
    pub(crate) startup: Option<Startup>,
    last_seen: Instant,
}

impl CacheEntry {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            startup: None,
            last_seen: Instant::now(),
        }
    }

    fn is_starting(&self) -> bool {
        self.startup.as_ref().is_some_and(Startup::is_pending)
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.last_seen) > ttl)
    }
}

/// Concurrent map from platform user to internal identity
pub struct IdentityCache {
    entries: DashMap<CacheKey, CacheEntry>,
    config: IdentityCacheConfig,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(IdentityCacheConfig::default())
    }
}

impl IdentityCache {
    pub fn new(config: IdentityCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &IdentityCacheConfig {
        &self.config
    }

    /// Cache `identity` for `key` and return the identity it replaced
    ///
    /// Re-inserting the same identity keeps any startup state in place. A
    /// different identity replaces the entry, unless a startup for the current
    /// one is still pending, in which case the cache is left untouched.
    pub fn insert(&self, key: CacheKey, identity: Identity) -> Option<Identity> {
        let previous = {
            let mut slot = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(identity.clone()));
            slot.last_seen = Instant::now();
            if slot.identity == identity {
                None
            } else if slot.is_starting() {
                debug!(key = %key, "Identity change ignored while worker startup is pending");
                None
            } else {
                let old = std::mem::replace(&mut slot.identity, identity);
                slot.startup = None;
                Some(old)
            }
        };
        self.enforce_capacity();
        previous
    }

    /// Identity cached for `key`, if any and not expired
    pub fn get(&self, key: &CacheKey) -> Option<Identity> {
        let ttl = self.config.ttl();
        let now = Instant::now();
        {
            let mut entry = self.entries.get_mut(key)?;
            if entry.is_starting() || !entry.is_expired(ttl, now) {
                entry.last_seen = now;
                return Some(entry.identity.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| !entry.is_starting() && entry.is_expired(ttl, now));
        None
    }

    /// Forget `key` and return its identity
    ///
    /// # Errors
    ///
    /// `IdentityError::StartupPending` while a worker startup for `key` is in
    /// flight; the entry is kept so no second launch can be installed.
    pub fn remove(&self, key: &CacheKey) -> IdentityResult<Option<Identity>> {
        if let Some((_, entry)) = self.entries.remove_if(key, |_, entry| !entry.is_starting()) {
            return Ok(Some(entry.identity));
        }
        if self.is_starting(key) {
            debug!(key = %key, "Refusing to remove entry with pending startup");
            return Err(IdentityError::StartupPending(key.to_string()));
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a worker startup for `key` is in flight
    pub fn is_starting(&self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.is_starting())
    }

    /// Drop expired entries, then the least recently seen ones above capacity
    ///
    /// Entries with a pending startup are skipped. Returns how many were removed.
    pub fn evict(&self) -> usize {
        let ttl = self.config.ttl();
        let now = Instant::now();
        let before = self.entries.len();

        if ttl.is_some() {
            self.entries
                .retain(|_, entry| entry.is_starting() || !entry.is_expired(ttl, now));
        }
        self.enforce_capacity();

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Evicted cached identities");
        }
        removed
    }

    /// Once over `max_entries`, evict down to a tenth below it so that a full
    /// cache does not rescan on every insert
    fn enforce_capacity(&self) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        let len = self.entries.len();
        if len <= max {
            return;
        }
        let excess = len - (max - max / 10);

        let mut idle: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_starting())
            .map(|entry| (entry.key().clone(), entry.last_seen))
            .collect();
        if excess < idle.len() {
            idle.select_nth_unstable_by_key(excess, |(_, seen)| *seen);
            idle.truncate(excess);
        }

        for (key, _) in idle {
            self.entries.remove_if(&key, |_, entry| !entry.is_starting());
        }
    }

    /// Run `f` on the entry for `key` while holding its shard lock
    ///
    /// `f` must not block or await.
    pub(crate) fn with_entry<R>(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> Option<R> {
        self.entries.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    /// Clear the startup of `key` if it still belongs to `generation`
    pub(crate) fn clear_startup(&self, key: &CacheKey, generation: u64) -> bool {
        self.with_entry(key, |entry| {
            if entry
                .startup
                .as_ref()
                .is_some_and(|s| s.generation == generation)
            {
                entry.startup = None;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Clear a completed startup of `key`; pending ones are kept
    pub(crate) fn clear_finished_startup(&self, key: &CacheKey) -> bool {
        self.with_entry(key, |entry| {
            if entry.startup.as_ref().is_some_and(|s| !s.is_pending()) {
                entry.startup = None;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }
}

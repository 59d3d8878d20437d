//! Backend registry fed by lifecycle events

use crate::backend::{validate_name, Backend};
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result, ValidationError};
use crate::event::{Lifecycle, LifecycleEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// BackendRegistry is the single owner of the `name -> Backend` map.
///
/// Every mutation happens under the write lock and stamps `last_seen` from
/// the registry clock while holding it, so an expiry sweep and a concurrent
/// heartbeat are always ordered one way or the other.
pub struct BackendRegistry {
    // Ordered by name, which makes "iteration order" deterministic for callers
    backends: Arc<RwLock<BTreeMap<String, Backend>>>,
    clock: Arc<dyn Clock>,
}

/// Effect of applying one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The name was absent and is now registered
    Inserted,
    /// An existing entry was replaced by the carried snapshot
    Replaced,
    Removed,
    /// Nothing to do (occupancy for an unknown name, repeated unregister)
    Ignored,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            backends: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
        }
    }

    /// Current time according to the registry clock
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Apply one lifecycle event.
    ///
    /// Invalid events are rejected before the map is touched; the caller
    /// decides how to report them.
    pub async fn apply(&self, event: &LifecycleEvent) -> std::result::Result<ApplyOutcome, ValidationError> {
        match &event.action {
            Lifecycle::Register(backend) | Lifecycle::Heartbeat(backend) => {
                backend.validate()?;
                Ok(self.upsert(backend).await)
            }
            Lifecycle::OccupancyIncrease(backend) | Lifecycle::OccupancyDecrease(backend) => {
                backend.validate()?;
                Ok(self.replace_existing(backend).await)
            }
            Lifecycle::Unregister(name) => {
                validate_name(name)?;
                Ok(self.remove(name).await)
            }
        }
    }

    // Last writer wins: a register for a live name replaces it outright
    async fn upsert(&self, backend: &Backend) -> ApplyOutcome {
        let mut backends = self.backends.write().await;
        let stamped = backend.clone().with_last_seen(self.clock.now_ms());
        match backends.insert(backend.name.clone(), stamped) {
            Some(_) => {
                debug!("Refreshed backend: {}", backend);
                ApplyOutcome::Replaced
            }
            None => {
                info!("Registered backend: {}", backend);
                ApplyOutcome::Inserted
            }
        }
    }

    // Occupancy events never create an entry
    async fn replace_existing(&self, backend: &Backend) -> ApplyOutcome {
        let mut backends = self.backends.write().await;
        match backends.get_mut(&backend.name) {
            Some(entry) => {
                *entry = backend.clone().with_last_seen(self.clock.now_ms());
                debug!(
                    "Updated occupancy for {}: {}/{}",
                    backend.name, backend.current_players, backend.max_players
                );
                ApplyOutcome::Replaced
            }
            None => {
                debug!("Ignoring occupancy update for unknown backend: {}", backend.name);
                ApplyOutcome::Ignored
            }
        }
    }

    async fn remove(&self, name: &str) -> ApplyOutcome {
        let mut backends = self.backends.write().await;
        match backends.remove(name) {
            Some(_) => {
                info!("Unregistered backend: {}", name);
                ApplyOutcome::Removed
            }
            None => ApplyOutcome::Ignored,
        }
    }

    /// Adjust the player count of a known backend by `delta`.
    ///
    /// This is the inbound path for hosts that observe joins and leaves
    /// themselves. Returns the new snapshot, or `None` for an unknown name.
    pub async fn report_occupancy_change(&self, name: &str, delta: i32) -> Option<Backend> {
        let mut backends = self.backends.write().await;
        let entry = backends.get_mut(name)?;
        let updated = Backend {
            current_players: entry.current_players.saturating_add_signed(delta),
            last_seen: self.clock.now_ms(),
            ..entry.clone()
        };
        *entry = updated.clone();
        debug!(
            "Occupancy of {} changed by {}: {}/{}",
            name, delta, updated.current_players, updated.max_players
        );
        Some(updated)
    }

    /// Remove every backend not heard from for longer than `timeout`
    pub async fn sweep_expired(&self, timeout: Duration) -> BTreeSet<String> {
        let mut backends = self.backends.write().await;
        let now = self.clock.now_ms();
        let mut removed = BTreeSet::new();
        backends.retain(|name, backend| {
            if backend.is_timed_out(now, timeout) {
                removed.insert(name.clone());
                false
            } else {
                true
            }
        });
        for name in &removed {
            info!("Expired backend: {}", name);
        }
        removed
    }

    /// Point-in-time copy of the whole map
    pub async fn snapshot(&self) -> BTreeMap<String, Backend> {
        self.backends.read().await.clone()
    }

    pub async fn lookup(&self, name: &str) -> Option<Backend> {
        self.backends.read().await.get(name).cloned()
    }

    /// Like [`lookup`](Self::lookup) but absent is an error
    pub async fn get_backend(&self, name: &str) -> Result<Backend> {
        self.lookup(name)
            .await
            .ok_or_else(|| CoreError::BackendNotFound(name.to_string()))
    }

    /// All backends in name order
    pub async fn list_backends(&self) -> Vec<Backend> {
        self.backends.read().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.backends.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

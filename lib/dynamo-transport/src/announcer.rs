//! Producer side: a backend publishing its own lifecycle

use crate::error::Result;
use crate::transport::Transport;
use dynamo_api::{AnnounceSettings, TopicsConfig};
use dynamo_core::codec;
use dynamo_core::{Backend, Lifecycle, LifecycleEvent};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Publishes register, heartbeat, occupancy and unregister events for one
/// backend. Clones share the same identity and player count.
#[derive(Clone)]
pub struct BackendAnnouncer {
    transport: Arc<dyn Transport>,
    topics: TopicsConfig,
    backend: Arc<Mutex<Backend>>,
    heartbeat_interval: Duration,
}

impl BackendAnnouncer {
    pub fn new(transport: Arc<dyn Transport>, topics: TopicsConfig, settings: &AnnounceSettings) -> Self {
        let backend = Backend::new(&settings.name, &settings.host, settings.port)
            .with_groups(settings.groups.iter().cloned())
            .with_players(0, settings.max_players);
        Self {
            transport,
            topics,
            backend: Arc::new(Mutex::new(backend)),
            heartbeat_interval: settings.heartbeat_interval(),
        }
    }

    /// Current self-description
    pub fn backend(&self) -> Backend {
        self.lock().clone()
    }

    pub async fn register(&self) -> Result<()> {
        let backend = self.backend();
        info!("Announcing backend {}", backend);
        self.send(&self.topics.register, Lifecycle::Register(backend)).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let backend = self.backend();
        self.send(&self.topics.heartbeat, Lifecycle::Heartbeat(backend)).await
    }

    pub async fn unregister(&self) -> Result<()> {
        let name = self.lock().name.clone();
        info!("Withdrawing backend {}", name);
        self.send(&self.topics.unregister, Lifecycle::Unregister(name)).await
    }

    /// Count a player in and publish the new occupancy
    pub async fn player_joined(&self) -> Result<()> {
        let backend = self.adjust(1);
        self.send(&self.topics.heartbeat, Lifecycle::OccupancyIncrease(backend)).await
    }

    /// Count a player out and publish the new occupancy
    pub async fn player_left(&self) -> Result<()> {
        let backend = self.adjust(-1);
        self.send(&self.topics.heartbeat, Lifecycle::OccupancyDecrease(backend)).await
    }

    /// Overwrite the local player count; published with the next heartbeat
    pub fn set_occupancy(&self, current_players: u32) {
        self.lock().current_players = current_players;
    }

    /// Heartbeat every interval until `shutdown` flips to `true`. Failed
    /// publishes are logged and retried on the next tick.
    pub fn spawn_heartbeats(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let announcer = self.clone();
        tokio::spawn(async move {
            let interval = announcer.heartbeat_interval;
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Heartbeat loop shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = announcer.heartbeat().await {
                            warn!("Heartbeat failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    fn adjust(&self, delta: i32) -> Backend {
        let mut backend = self.lock();
        backend.current_players = backend.current_players.saturating_add_signed(delta);
        backend.clone()
    }

    async fn send(&self, subject: &str, action: Lifecycle) -> Result<()> {
        let payload = codec::encode(&LifecycleEvent::now(action))?;
        self.transport.publish(subject, payload).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

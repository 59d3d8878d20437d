//! Periodic expiry of backends that stopped heartbeating

use crate::listener::{BackendListener, NoopListener, RemovalReason};
use crate::metrics::DynamoMetrics;
use crate::registry::BackendRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Sweeper configuration
#[derive(Clone, Debug)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Maximum age of the last event before a backend is removed
    pub health_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            health_timeout: Duration::from_secs(30),
        }
    }
}

/// Removes expired backends and tells the host about each removal
pub struct ExpirySweeper {
    registry: Arc<BackendRegistry>,
    listener: Arc<dyn BackendListener>,
    metrics: Option<DynamoMetrics>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<BackendRegistry>, config: SweeperConfig) -> Self {
        Self {
            registry,
            listener: Arc::new(NoopListener),
            metrics: None,
            config,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn BackendListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_metrics(mut self, metrics: DynamoMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one sweep now
    pub async fn sweep_once(&self) -> BTreeSet<String> {
        let removed = self.registry.sweep_expired(self.config.health_timeout).await;
        for name in &removed {
            self.listener.on_removed(name, RemovalReason::Expired);
        }
        if let Some(metrics) = &self.metrics {
            metrics.backends_expired_total.inc_by(removed.len() as u64);
            metrics
                .registered_backends
                .set(self.registry.len().await as i64);
        }
        if !removed.is_empty() {
            debug!("Sweep removed {} backends", removed.len());
        }
        removed
    }

    /// Sweep every interval until `shutdown` flips to `true` or its sender
    /// is dropped. The first sweep happens one interval after spawning.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting expiry sweeper with interval {:?} and timeout {:?}",
                self.config.interval, self.config.health_timeout
            );

            let mut ticker = time::interval_at(Instant::now() + self.config.interval, self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Expiry sweeper shutting down");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
        })
    }
}

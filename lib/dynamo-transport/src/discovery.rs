//! Registry side of the bus: subscription loop and sweeper lifecycle

use crate::error::Result;
use crate::transport::{MessageStream, Transport};
use dynamo_api::DynamoConfig;
use dynamo_core::codec;
use dynamo_core::{
    ApplyOutcome, BackendListener, BackendRegistry, DynamoMetrics, ExpirySweeper, NoopListener,
    RemovalReason, SweeperConfig,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Applies decoded payloads to the registry
#[derive(Clone)]
pub struct EventHandler {
    registry: Arc<BackendRegistry>,
    listener: Arc<dyn BackendListener>,
    metrics: Option<DynamoMetrics>,
}

impl EventHandler {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            listener: Arc::new(NoopListener),
            metrics: None,
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

    /// Decode and apply one payload. Bad payloads are logged and dropped;
    /// `None` means the payload never reached the registry.
    pub async fn handle(&self, subject: &str, payload: &[u8]) -> Option<ApplyOutcome> {
        let event = match codec::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping undecodable payload on {}: {}", subject, e);
                self.record_rejection("decode");
                return None;
            }
        };

        let outcome = match self.registry.apply(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Dropping invalid {} event on {}: {}", event.kind(), subject, e);
                self.record_rejection(e.reason());
                return None;
            }
        };

        match outcome {
            ApplyOutcome::Inserted => {
                if let Some(backend) = event.backend() {
                    self.listener.on_registered(backend);
                }
            }
            ApplyOutcome::Removed => {
                self.listener.on_removed(event.name(), RemovalReason::Unregistered)
            }
            ApplyOutcome::Replaced | ApplyOutcome::Ignored => {}
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .events_applied_total
                .with_label_values(&[event.kind().as_str()])
                .inc();
            metrics
                .registered_backends
                .set(self.registry.len().await as i64);
        }

        debug!("Applied {} ({:?})", event, outcome);
        Some(outcome)
    }

    fn record_rejection(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .events_rejected_total
                .with_label_values(&[reason])
                .inc();
        }
    }
}

/// Upper bound for the doubling delay between resubscribe attempts
const MAX_RESUBSCRIBE_WAIT: Duration = Duration::from_secs(30);

/// Keeps the registry in sync with the bus.
///
/// `start` subscribes and spawns the event loop and the expiry sweeper;
/// `stop` signals both and waits for them. When the subscription ends the
/// loop resubscribes with backoff. Once it gives up, `is_running` turns false
/// and `start` subscribes again.
pub struct DiscoveryService {
    transport: Arc<dyn Transport>,
    registry: Arc<BackendRegistry>,
    pattern: String,
    sweeper_config: SweeperConfig,
    reconnect_wait: Duration,
    max_reconnect_attempts: u32,
    listener: Arc<dyn BackendListener>,
    metrics: Option<DynamoMetrics>,
    shutdown: Option<watch::Sender<bool>>,
    event_loop: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl DiscoveryService {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<BackendRegistry>,
        config: &DynamoConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            pattern: config.topics.pattern.clone(),
            sweeper_config: SweeperConfig {
                interval: config.registry.sweep_interval(),
                health_timeout: config.registry.health_timeout(),
            },
            reconnect_wait: Duration::from_millis(config.transport.reconnect_wait_ms),
            max_reconnect_attempts: config.transport.max_reconnect_attempts,
            listener: Arc::new(NoopListener),
            metrics: None,
            shutdown: None,
            event_loop: None,
            sweeper: None,
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

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Whether events are still flowing into the registry
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
            && self
                .event_loop
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe and start background tasks. A no-op while running; after
    /// the event loop gave up, the old tasks are stopped and replaced.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Discovery service already running");
            return Ok(());
        }
        self.stop().await;

        let stream = self.transport.subscribe(&self.pattern).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handler = EventHandler::new(self.registry.clone()).with_listener(self.listener.clone());
        let mut sweeper = ExpirySweeper::new(self.registry.clone(), self.sweeper_config.clone())
            .with_listener(self.listener.clone());
        if let Some(metrics) = &self.metrics {
            handler = handler.with_metrics(metrics.clone());
            sweeper = sweeper.with_metrics(metrics.clone());
        }

        let subscriber = Resubscriber {
            transport: self.transport.clone(),
            pattern: self.pattern.clone(),
            reconnect_wait: self.reconnect_wait,
            max_attempts: self.max_reconnect_attempts,
        };
        self.event_loop = Some(spawn_event_loop(stream, subscriber, handler, shutdown_rx.clone()));
        self.sweeper = Some(sweeper.spawn(shutdown_rx));
        self.shutdown = Some(shutdown_tx);

        info!("Discovery service listening on {}", self.pattern);
        Ok(())
    }

    /// Stop the event loop and the sweeper. Registry contents are kept.
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        // Receivers treat a dropped sender as shutdown too
        let _ = shutdown.send(true);

        for task in [self.event_loop.take(), self.sweeper.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!("Discovery task ended abnormally: {}", e);
            }
        }
        info!("Discovery service stopped");
    }
}

/// Restores a subscription that ended underneath the event loop
struct Resubscriber {
    transport: Arc<dyn Transport>,
    pattern: String,
    reconnect_wait: Duration,
    /// 0 retries forever
    max_attempts: u32,
}

impl Resubscriber {
    /// `None` when shutdown was requested or every attempt failed
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<MessageStream> {
        let mut wait = self.reconnect_wait;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tokio::select! {
                _ = shutdown_requested(shutdown) => return None,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.transport.subscribe(&self.pattern).await {
                Ok(stream) => {
                    info!("Resubscribed to {} after {} attempt(s)", self.pattern, attempt);
                    return Some(stream);
                }
                Err(e) => {
                    warn!("Resubscribe attempt {} to {} failed: {}", attempt, self.pattern, e);
                }
            }

            if self.max_attempts != 0 && attempt >= self.max_attempts {
                error!(
                    "Giving up on {} after {} attempts; registry no longer receives events",
                    self.pattern, attempt
                );
                return None;
            }
            wait = (wait * 2).min(MAX_RESUBSCRIBE_WAIT);
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn spawn_event_loop(
    mut stream: MessageStream,
    subscriber: Resubscriber,
    handler: EventHandler,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    debug!("Event loop shutting down");
                    break;
                }
                message = stream.next() => {
                    match message {
                        Some(message) => {
                            handler.handle(&message.subject, &message.payload).await;
                        }
                        None => {
                            warn!("Subscription to {} ended", subscriber.pattern);
                            match subscriber.resubscribe(&mut shutdown).await {
                                Some(restored) => stream = restored,
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    })
}

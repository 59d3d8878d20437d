use anyhow::Result;
use dynamo_api::DynamoConfig;
use dynamo_balancer::LoadBalancer;
use dynamo_core::{Backend, BackendListener, BackendRegistry, DynamoMetrics, RemovalReason};
use dynamo_transport::{BackendAnnouncer, DiscoveryService, InMemoryTransport, Transport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "DYNAMO_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yml";
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Mirrors registry membership into the log
struct LoggingListener;

impl BackendListener for LoggingListener {
    fn on_registered(&self, backend: &Backend) {
        info!("Backend joined: {}", backend);
    }

    fn on_removed(&self, name: &str, reason: RemovalReason) {
        info!("Backend left: {} ({})", name, reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting dynamo-proxy...");

    let config = load_config()?;
    config.validate()?;
    info!(
        "Health timeout {:?}, sweep interval {:?}, default group {}",
        config.registry.health_timeout(),
        config.registry.sweep_interval(),
        config.load_balancing.default_group
    );

    let metrics = DynamoMetrics::new()?;
    let registry = Arc::new(BackendRegistry::new());
    let balancer = LoadBalancer::new(registry.clone(), &config).with_metrics(metrics.clone());
    info!("Load balancer initialized with {} group policies", config.groups.len());

    // No external bus adapter is linked in; everything runs on the local bus
    let transport = InMemoryTransport::new();
    let bus: Arc<dyn Transport> = Arc::new(transport.clone());
    if !config.transport.url.is_empty() {
        debug!("Ignoring transport url {} in favor of the in-process bus", config.transport.url);
    }

    let mut discovery = DiscoveryService::new(bus.clone(), registry.clone(), &config)
        .with_listener(Arc::new(LoggingListener))
        .with_metrics(metrics.clone());
    discovery.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let announcer = match &config.announce {
        Some(settings) => {
            let announcer = BackendAnnouncer::new(bus.clone(), config.topics.clone(), settings);
            announcer.register().await?;
            let handle = announcer.spawn_heartbeats(shutdown_rx.clone());
            Some((announcer, handle))
        }
        None => None,
    };

    let status = tokio::spawn(report_status(balancer, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    let _ = shutdown_tx.send(true);
    if let Some((announcer, handle)) = announcer {
        if let Err(e) = announcer.unregister().await {
            warn!("Failed to unregister local backend: {}", e);
        }
        handle.await?;
    }
    status.await?;
    discovery.stop().await;
    transport.close();

    debug!("Final metrics:\n{}", metrics.gather()?);
    Ok(())
}

fn load_config() -> Result<DynamoConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    if !Path::new(&path).exists() {
        warn!("Config file {} not found, using defaults", path);
        return Ok(DynamoConfig::default());
    }

    info!("Loading config from {}", path);
    Ok(DynamoConfig::from_file(&path)?)
}

async fn report_status(balancer: LoadBalancer, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let by_group = balancer.servers_by_group().await;
                let total: usize = by_group.values().map(Vec::len).sum();
                info!("{} healthy backend slots across {} groups", total, by_group.len());
                for (group, backends) in &by_group {
                    let full: Vec<&str> = backends
                        .iter()
                        .filter(|backend| balancer.should_migrate(backend))
                        .map(|backend| backend.name.as_str())
                        .collect();
                    debug!("Group {}: {} healthy, near capacity: {:?}", group, backends.len(), full);
                }
                if balancer.servers_in_group(balancer.default_group()).await.is_empty() {
                    warn!("Default group {} has no healthy backend", balancer.default_group());
                }
            }
        }
    }
}

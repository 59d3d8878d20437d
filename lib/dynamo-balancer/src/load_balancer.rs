//! Load balancing strategies for distributing players across backends

use dynamo_api::{DynamoConfig, GroupPolicy, LoadBalancingStrategy};
use dynamo_core::{Backend, BackendRegistry, DynamoMetrics};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Metrics label for groups that have no configured policy
const OTHER_GROUP_LABEL: &str = "other";

/// Which step of the fallback chain produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    /// The requested group's strategy
    Group,
    /// The group's configured fallback backend
    FallbackBackend,
    /// The default group
    DefaultGroup,
}

/// A backend chosen by [`LoadBalancer::select_with_fallback`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub backend: Backend,
    pub source: SelectionSource,
}

/// Load balancer selecting healthy backends from registry snapshots.
///
/// Never mutates the registry. The only state it owns is one round-robin
/// counter per group, which lives as long as the balancer.
pub struct LoadBalancer {
    registry: Arc<BackendRegistry>,
    config: DynamoConfig,
    health_timeout: Duration,
    round_robin_counters: Mutex<HashMap<String, usize>>,
    metrics: Option<DynamoMetrics>,
}

impl LoadBalancer {
    /// Create a load balancer from validated configuration
    pub fn new(registry: Arc<BackendRegistry>, config: &DynamoConfig) -> Self {
        Self {
            registry,
            config: config.clone(),
            health_timeout: config.registry.health_timeout(),
            round_robin_counters: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DynamoMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_group(&self) -> &str {
        &self.config.load_balancing.default_group
    }

    /// Policy of a group, or the default policy for unconfigured groups
    pub fn policy(&self, group: &str) -> GroupPolicy {
        self.config.group_policy(group)
    }

    /// Fresh enough and below capacity
    pub fn is_healthy(&self, backend: &Backend, now_ms: i64) -> bool {
        !backend.is_timed_out(now_ms, self.health_timeout) && !backend.is_full()
    }

    /// Healthy members of a group, in name order
    pub async fn servers_in_group(&self, group: &str) -> Vec<Backend> {
        let snapshot = self.registry.snapshot().await;
        let now = self.registry.now_ms();
        snapshot
            .into_values()
            .filter(|backend| backend.in_group(group))
            .filter(|backend| self.is_healthy(backend, now))
            .collect()
    }

    /// Healthy backends bucketed by every group they belong to
    pub async fn servers_by_group(&self) -> BTreeMap<String, Vec<Backend>> {
        let snapshot = self.registry.snapshot().await;
        let now = self.registry.now_ms();
        let mut by_group: BTreeMap<String, Vec<Backend>> = BTreeMap::new();

        for backend in snapshot.into_values() {
            if !self.is_healthy(&backend, now) {
                continue;
            }
            for group in &backend.groups {
                by_group.entry(group.clone()).or_default().push(backend.clone());
            }
        }

        by_group
    }

    /// Select a healthy backend of `group` with the group's strategy
    pub async fn select_server(&self, group: &str) -> Option<Backend> {
        let servers = self.servers_in_group(group).await;

        if servers.is_empty() {
            debug!("No healthy backend in group {}", group);
            self.record_selection(group, "miss");
            return None;
        }

        let strategy = self.policy(group).strategy;
        let selected = self.select_by_strategy(group, &servers, strategy);

        if let Some(backend) = &selected {
            debug!("Selected {} from group {} using {}", backend.name, group, strategy);
            self.record_selection(group, "selected");
        }
        selected
    }

    /// Select from the configured default group
    pub async fn select_default_server(&self) -> Option<Backend> {
        self.select_server(self.default_group()).await
    }

    /// Select with the full fallback chain: the group itself, then its
    /// fallback backend, then the default group.
    pub async fn select_with_fallback(&self, group: &str) -> Option<Selection> {
        if let Some(backend) = self.select_server(group).await {
            return Some(Selection {
                backend,
                source: SelectionSource::Group,
            });
        }

        if let Some(name) = self.policy(group).fallback_backend {
            match self.registry.lookup(&name).await {
                Some(backend) if self.is_healthy(&backend, self.registry.now_ms()) => {
                    debug!("Using fallback backend {} for group {}", name, group);
                    return Some(Selection {
                        backend,
                        source: SelectionSource::FallbackBackend,
                    });
                }
                _ => debug!("Fallback backend {} for group {} is unavailable", name, group),
            }
        }

        if group != self.default_group() {
            if let Some(backend) = self.select_default_server().await {
                return Some(Selection {
                    backend,
                    source: SelectionSource::DefaultGroup,
                });
            }
        }

        warn!("No backend available for group {}", group);
        None
    }

    /// Find somewhere else to send players leaving `from`: another member of
    /// one of its groups, else the default group. Never returns `from`.
    pub async fn select_replacement(&self, from: &str) -> Option<Backend> {
        if let Some(original) = self.registry.lookup(from).await {
            for group in &original.groups {
                if let Some(backend) = self.select_server(group).await {
                    if backend.name != from {
                        return Some(backend);
                    }
                }
            }
        }

        self.select_default_server()
            .await
            .filter(|backend| backend.name != from)
    }

    /// Advisory only: whether players should be moved off `backend`
    pub fn should_migrate(&self, backend: &Backend) -> bool {
        let settings = &self.config.load_balancing;
        if !settings.auto_migrate {
            return false;
        }
        backend.player_ratio() * 100.0 >= f64::from(settings.migration_threshold_percent)
    }

    fn select_by_strategy(
        &self,
        group: &str,
        servers: &[Backend],
        strategy: LoadBalancingStrategy,
    ) -> Option<Backend> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(group, servers),
            LoadBalancingStrategy::LeastPlayers => Self::select_least_players(servers),
            LoadBalancingStrategy::Random => Self::select_random(servers),
            LoadBalancingStrategy::FirstAvailable => servers.first().cloned(),
        }
    }

    /// Select backend using the group's round-robin counter
    fn select_round_robin(&self, group: &str, servers: &[Backend]) -> Option<Backend> {
        if servers.is_empty() {
            return None;
        }

        let current = {
            let mut counters = self
                .round_robin_counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let counter = counters.entry(group.to_string()).or_insert(0);
            let current = *counter;
            *counter = counter.wrapping_add(1);
            current
        };
        servers.get(current % servers.len()).cloned()
    }

    /// Lowest fill ratio; ties go to the first in name order
    fn select_least_players(servers: &[Backend]) -> Option<Backend> {
        servers
            .iter()
            .min_by(|a, b| a.player_ratio().total_cmp(&b.player_ratio()))
            .cloned()
    }

    fn select_random(servers: &[Backend]) -> Option<Backend> {
        if servers.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..servers.len());
        servers.get(index).cloned()
    }

    fn record_selection(&self, group: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .selections_total
                .with_label_values(&[self.group_label(group), outcome])
                .inc();
        }
    }

    // Requested group names are caller input; only configured ones become series
    fn group_label<'a>(&self, group: &'a str) -> &'a str {
        if group == self.default_group() || self.config.groups.contains_key(group) {
            group
        } else {
            OTHER_GROUP_LABEL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_core::{Lifecycle, LifecycleEvent, ManualClock};

    fn backend(name: &str, group: &str, current: u32, max: u32) -> Backend {
        Backend::new(name, "10.0.0.1", 25565)
            .with_groups([group])
            .with_players(current, max)
    }

    fn config_with(group: &str, strategy: LoadBalancingStrategy) -> DynamoConfig {
        let mut config = DynamoConfig::default();
        config.groups.insert(
            group.to_string(),
            GroupPolicy {
                strategy,
                ..GroupPolicy::default()
            },
        );
        config
    }

    async fn setup(config: &DynamoConfig, backends: Vec<Backend>) -> (LoadBalancer, Arc<BackendRegistry>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let registry = Arc::new(BackendRegistry::with_clock(Arc::new(clock.clone())));
        for backend in backends {
            registry.apply(&LifecycleEvent::register(backend)).await.unwrap();
        }
        (LoadBalancer::new(registry.clone(), config), registry, clock)
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let config = config_with("G", LoadBalancingStrategy::RoundRobin);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![backend("X", "G", 0, 10), backend("Y", "G", 0, 10), backend("Z", "G", 0, 10)],
        )
        .await;

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(balancer.select_server("G").await.unwrap().name);
        }
        assert_eq!(picks, vec!["X", "Y", "Z", "X", "Y", "Z"]);
    }

    #[tokio::test]
    async fn test_round_robin_counters_are_per_group() {
        let config = DynamoConfig::default();
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![
                backend("a1", "a", 0, 10),
                backend("a2", "a", 0, 10),
                backend("b1", "b", 0, 10),
                backend("b2", "b", 0, 10),
            ],
        )
        .await;

        assert_eq!(balancer.select_server("a").await.unwrap().name, "a1");
        assert_eq!(balancer.select_server("b").await.unwrap().name, "b1");
        assert_eq!(balancer.select_server("a").await.unwrap().name, "a2");
        assert_eq!(balancer.select_server("b").await.unwrap().name, "b2");
    }

    #[tokio::test]
    async fn test_capacity_exclusion() {
        let config = DynamoConfig::default();
        let (balancer, _registry, _clock) = setup(&config, vec![backend("full", "lobby", 20, 20)]).await;
        assert!(balancer.select_server("lobby").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_never_selected() {
        let config = config_with("lobby", LoadBalancingStrategy::LeastPlayers);
        let (balancer, _registry, _clock) = setup(&config, vec![backend("empty", "lobby", 0, 0)]).await;
        assert!(balancer.select_server("lobby").await.is_none());
    }

    #[tokio::test]
    async fn test_least_players() {
        let config = config_with("lobby", LoadBalancingStrategy::LeastPlayers);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![backend("A", "lobby", 5, 10), backend("B", "lobby", 1, 10)],
        )
        .await;

        for _ in 0..5 {
            assert_eq!(balancer.select_server("lobby").await.unwrap().name, "B");
        }
    }

    #[tokio::test]
    async fn test_least_players_ties_go_to_first() {
        let config = config_with("lobby", LoadBalancingStrategy::LeastPlayers);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![backend("b", "lobby", 2, 10), backend("a", "lobby", 4, 20)],
        )
        .await;
        assert_eq!(balancer.select_server("lobby").await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_first_available() {
        let config = config_with("lobby", LoadBalancingStrategy::FirstAvailable);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![
                backend("a", "lobby", 10, 10),
                backend("b", "lobby", 9, 10),
                backend("c", "lobby", 0, 10),
            ],
        )
        .await;

        for _ in 0..3 {
            assert_eq!(balancer.select_server("lobby").await.unwrap().name, "b");
        }
    }

    #[tokio::test]
    async fn test_random_picks_a_healthy_member() {
        let config = config_with("lobby", LoadBalancingStrategy::Random);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![
                backend("a", "lobby", 0, 10),
                backend("b", "lobby", 0, 10),
                backend("full", "lobby", 10, 10),
                backend("other", "arena", 0, 10),
            ],
        )
        .await;

        for _ in 0..50 {
            let name = balancer.select_server("lobby").await.unwrap().name;
            assert!(name == "a" || name == "b", "unexpected pick {}", name);
        }
    }

    #[tokio::test]
    async fn test_stale_backends_are_unhealthy() {
        let config = DynamoConfig::default();
        let (balancer, registry, clock) = setup(&config, vec![backend("old", "lobby", 0, 10)]).await;

        clock.advance(Duration::from_secs(30));
        assert!(balancer.select_server("lobby").await.is_some());

        clock.advance(Duration::from_millis(1));
        assert!(balancer.select_server("lobby").await.is_none());
        // Selection does not remove anything; that is the sweeper's job
        assert!(registry.lookup("old").await.is_some());
    }

    #[tokio::test]
    async fn test_end_to_end_register_then_unregister() {
        let config = DynamoConfig::default();
        let (balancer, registry, _clock) = setup(&config, vec![]).await;

        let lobby = Backend::new("lobby-1", "10.0.0.1", 25565)
            .with_groups(["lobby"])
            .with_players(0, 20);
        registry.apply(&LifecycleEvent::register(lobby)).await.unwrap();
        assert_eq!(balancer.select_server("lobby").await.unwrap().name, "lobby-1");

        registry.apply(&LifecycleEvent::unregister("lobby-1")).await.unwrap();
        assert!(balancer.select_server("lobby").await.is_none());
    }

    #[tokio::test]
    async fn test_select_default_server() {
        let mut config = DynamoConfig::default();
        config.load_balancing.default_group = "hub".to_string();
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![backend("lobby-1", "lobby", 0, 10), backend("hub-1", "hub", 0, 10)],
        )
        .await;
        assert_eq!(balancer.default_group(), "hub");
        assert_eq!(balancer.select_default_server().await.unwrap().name, "hub-1");
    }

    #[tokio::test]
    async fn test_fallback_chain() {
        let mut config = DynamoConfig::default();
        config.groups.insert(
            "arena".to_string(),
            GroupPolicy {
                fallback_backend: Some("waiting-room".to_string()),
                ..GroupPolicy::default()
            },
        );
        let (balancer, registry, _clock) = setup(
            &config,
            vec![
                backend("arena-1", "arena", 8, 8),
                backend("waiting-room", "misc", 0, 50),
                backend("lobby-1", "lobby", 0, 20),
            ],
        )
        .await;

        let selection = balancer.select_with_fallback("arena").await.unwrap();
        assert_eq!(selection.backend.name, "waiting-room");
        assert_eq!(selection.source, SelectionSource::FallbackBackend);

        registry.apply(&LifecycleEvent::unregister("waiting-room")).await.unwrap();
        let selection = balancer.select_with_fallback("arena").await.unwrap();
        assert_eq!(selection.backend.name, "lobby-1");
        assert_eq!(selection.source, SelectionSource::DefaultGroup);

        let full_lobby = backend("lobby-1", "lobby", 20, 20);
        registry
            .apply(&LifecycleEvent::now(Lifecycle::OccupancyIncrease(full_lobby)))
            .await
            .unwrap();
        assert!(balancer.select_with_fallback("arena").await.is_none());

        registry
            .apply(&LifecycleEvent::now(Lifecycle::OccupancyDecrease(backend("arena-1", "arena", 7, 8))))
            .await
            .unwrap();
        let selection = balancer.select_with_fallback("arena").await.unwrap();
        assert_eq!(selection.source, SelectionSource::Group);
    }

    #[tokio::test]
    async fn test_select_replacement_skips_origin() {
        let config = config_with("arena", LoadBalancingStrategy::FirstAvailable);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![
                backend("arena-1", "arena", 0, 8),
                backend("arena-2", "arena", 0, 8),
                backend("lobby-1", "lobby", 0, 20),
            ],
        )
        .await;

        let replacement = balancer.select_replacement("arena-1").await.unwrap();
        assert_eq!(replacement.name, "lobby-1");

        let replacement = balancer.select_replacement("unknown").await.unwrap();
        assert_eq!(replacement.name, "lobby-1");

        assert!(balancer.select_replacement("lobby-1").await.is_none());
    }

    #[tokio::test]
    async fn test_servers_by_group() {
        let config = DynamoConfig::default();
        let multi = Backend::new("multi", "10.0.0.2", 25565)
            .with_groups(["lobby", "arena"])
            .with_players(0, 10);
        let (balancer, _registry, _clock) = setup(
            &config,
            vec![multi, backend("lobby-1", "lobby", 0, 10), backend("full", "lobby", 10, 10)],
        )
        .await;

        let by_group = balancer.servers_by_group().await;
        let names = |group: &str| -> Vec<String> {
            by_group[group].iter().map(|b| b.name.clone()).collect()
        };
        assert_eq!(names("lobby"), vec!["lobby-1", "multi"]);
        assert_eq!(names("arena"), vec!["multi"]);
    }

    #[tokio::test]
    async fn test_should_migrate() {
        let mut config = DynamoConfig::default();
        let (balancer, _registry, _clock) = setup(&config, vec![]).await;
        assert!(balancer.should_migrate(&backend("a", "lobby", 18, 20)));
        assert!(!balancer.should_migrate(&backend("a", "lobby", 17, 20)));

        config.load_balancing.auto_migrate = false;
        let (balancer, _registry, _clock) = setup(&config, vec![]).await;
        assert!(!balancer.should_migrate(&backend("a", "lobby", 20, 20)));
    }

    #[tokio::test]
    async fn test_selection_metrics() {
        let config = config_with("arena", LoadBalancingStrategy::RoundRobin);
        let (balancer, _registry, _clock) = setup(&config, vec![backend("lobby-1", "lobby", 0, 10)]).await;
        let metrics = DynamoMetrics::new().unwrap();
        let balancer = balancer.with_metrics(metrics.clone());

        balancer.select_server("lobby").await;
        balancer.select_server("arena").await;

        let selected = metrics.selections_total.with_label_values(&["lobby", "selected"]).get();
        let missed = metrics.selections_total.with_label_values(&["arena", "miss"]).get();
        assert_eq!(selected, 1);
        assert_eq!(missed, 1);
    }

    #[tokio::test]
    async fn test_unconfigured_groups_share_one_metrics_label() {
        let config = DynamoConfig::default();
        let (balancer, _registry, _clock) = setup(&config, vec![]).await;
        let metrics = DynamoMetrics::new().unwrap();
        let balancer = balancer.with_metrics(metrics.clone());

        for i in 0..20 {
            balancer.select_server(&format!("made-up-{}", i)).await;
        }

        let other = metrics.selections_total.with_label_values(&["other", "miss"]).get();
        assert_eq!(other, 20);
        let text = metrics.gather().unwrap();
        assert!(!text.contains("made-up-"));
    }
}

//! Typed configuration for the registry, balancer and announcer
//!
//! The whole file is deserialized once at startup and checked with
//! [`DynamoConfig::validate`]; components receive the sections they need
//! instead of looking values up by path.

use crate::strategy::LoadBalancingStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamoConfig {
    /// Message bus connection settings, consumed by the transport adapter
    #[serde(default, alias = "nats")]
    pub transport: TransportSettings,

    /// Subjects used for lifecycle events
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Expiry settings for the backend registry
    #[serde(default, alias = "proxy")]
    pub registry: RegistrySettings,

    /// Global balancing settings
    #[serde(default)]
    pub load_balancing: BalancingSettings,

    /// Per-group selection policies keyed by group name
    #[serde(default)]
    pub groups: BTreeMap<String, GroupPolicy>,

    /// Identity a backend announces about itself (producer side only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<AnnounceSettings>,
}

/// Message bus connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransportSettings {
    #[serde(default = "default_transport_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout_ms", alias = "connection-timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_wait_ms", alias = "reconnect-timeout")]
    pub reconnect_wait_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: default_transport_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_wait_ms: default_reconnect_wait_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Subjects on which lifecycle events travel
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopicsConfig {
    #[serde(default = "default_register_subject")]
    pub register: String,

    /// Heartbeats and occupancy changes share this subject
    #[serde(default = "default_heartbeat_subject")]
    pub heartbeat: String,

    #[serde(default = "default_unregister_subject")]
    pub unregister: String,

    /// Pattern the registry subscribes to; must cover the three subjects above
    #[serde(default = "default_subject_pattern")]
    pub pattern: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            register: default_register_subject(),
            heartbeat: default_heartbeat_subject(),
            unregister: default_unregister_subject(),
            pattern: default_subject_pattern(),
        }
    }
}

/// Registry expiry settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistrySettings {
    /// Age after which a backend without news is considered dead
    #[serde(default = "default_health_timeout_seconds", alias = "server-timeout")]
    pub health_timeout_seconds: u64,

    /// Period of the expiry sweep
    #[serde(default = "default_sweep_interval_seconds", alias = "cleanup-interval")]
    pub sweep_interval_seconds: u64,
}

impl RegistrySettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            health_timeout_seconds: default_health_timeout_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

/// Global balancing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BalancingSettings {
    /// Group used when a caller does not name one
    #[serde(default = "default_group")]
    pub default_group: String,

    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    /// Fill percentage at or above which migration is advised
    #[serde(default = "default_migration_threshold", alias = "migration-threshold")]
    pub migration_threshold_percent: u8,
}

impl Default for BalancingSettings {
    fn default() -> Self {
        Self {
            default_group: default_group(),
            auto_migrate: default_auto_migrate(),
            migration_threshold_percent: default_migration_threshold(),
        }
    }
}

/// Selection policy for one group
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupPolicy {
    #[serde(default, rename = "load-balancing", alias = "strategy")]
    pub strategy: LoadBalancingStrategy,

    /// Backend to use when the strategy finds nothing healthy
    #[serde(default, rename = "fallback-server", skip_serializing_if = "Option::is_none")]
    pub fallback_backend: Option<String>,

    /// Reserved for tie-breaking between groups; not used by any strategy yet
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::default(),
            fallback_backend: None,
            priority: default_priority(),
        }
    }
}

/// What a backend announces about itself
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnnounceSettings {
    pub name: String,
    pub host: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default = "default_max_players")]
    pub max_players: u32,

    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
}

impl AnnounceSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

impl DynamoConfig {
    /// Parse a YAML document. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Policy for a group; groups without an entry use the default policy
    pub fn group_policy(&self, group: &str) -> GroupPolicy {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    /// Check cross-field constraints once, before any component starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.health_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "registry.health-timeout-seconds must be positive".to_string(),
            ));
        }
        if self.registry.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "registry.sweep-interval-seconds must be positive".to_string(),
            ));
        }
        if self.load_balancing.migration_threshold_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "load-balancing.migration-threshold-percent must be within 0..=100, got {}",
                self.load_balancing.migration_threshold_percent
            )));
        }
        if self.load_balancing.default_group.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "load-balancing.default-group must not be empty".to_string(),
            ));
        }

        for (key, subject) in [
            ("topics.register", &self.topics.register),
            ("topics.heartbeat", &self.topics.heartbeat),
            ("topics.unregister", &self.topics.unregister),
            ("topics.pattern", &self.topics.pattern),
        ] {
            if !is_well_formed_subject(subject) {
                return Err(ConfigError::Invalid(format!(
                    "{} is not a valid subject: {:?}",
                    key, subject
                )));
            }
        }

        for (group, policy) in &self.groups {
            if group.trim().is_empty() {
                return Err(ConfigError::Invalid("group names must not be empty".to_string()));
            }
            if let Some(fallback) = &policy.fallback_backend {
                if fallback.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "groups.{}.fallback-server must not be empty when set",
                        group
                    )));
                }
            }
        }

        if let Some(announce) = &self.announce {
            if announce.name.trim().is_empty() || announce.host.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "announce.name and announce.host are required".to_string(),
                ));
            }
            if announce.port == 0 {
                return Err(ConfigError::Invalid("announce.port must not be 0".to_string()));
            }
            if announce.heartbeat_interval_seconds == 0
                || announce.heartbeat_interval_seconds >= self.registry.health_timeout_seconds
            {
                return Err(ConfigError::Invalid(format!(
                    "announce.heartbeat-interval-seconds must be between 1 and {} (the health timeout)",
                    self.registry.health_timeout_seconds - 1
                )));
            }
        }

        Ok(())
    }
}

// Dot-separated tokens, no empty tokens, no whitespace. Wildcard placement is
// checked by the transport when it parses the pattern.
fn is_well_formed_subject(subject: &str) -> bool {
    !subject.is_empty()
        && !subject.chars().any(char::is_whitespace)
        && subject.split('.').all(|token| !token.is_empty())
}

// Default values
fn default_transport_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_wait_ms() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_register_subject() -> String {
    "minecraft.server.register".to_string()
}

fn default_heartbeat_subject() -> String {
    "minecraft.server.heartbeat".to_string()
}

fn default_unregister_subject() -> String {
    "minecraft.server.unregister".to_string()
}

fn default_subject_pattern() -> String {
    "minecraft.server.*".to_string()
}

fn default_health_timeout_seconds() -> u64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    15
}

fn default_group() -> String {
    "lobby".to_string()
}

fn default_auto_migrate() -> bool {
    true
}

fn default_migration_threshold() -> u8 {
    90
}

fn default_priority() -> i32 {
    1
}

fn default_backend_port() -> u16 {
    25565
}

fn default_max_players() -> u32 {
    100
}

fn default_heartbeat_interval_seconds() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
registry:
  health-timeout-seconds: 45
  sweep-interval-seconds: 5
load-balancing:
  default-group: hub
  auto-migrate: false
  migration-threshold-percent: 75
groups:
  hub:
    load-balancing: LEAST_PLAYERS
    fallback-server: hub-1
    priority: 3
  arena:
    load-balancing: sticky
"#;

    #[test]
    fn test_defaults() {
        let config = DynamoConfig::default();
        assert_eq!(config.registry.health_timeout(), Duration::from_secs(30));
        assert_eq!(config.registry.sweep_interval(), Duration::from_secs(15));
        assert_eq!(config.load_balancing.default_group, "lobby");
        assert!(config.load_balancing.auto_migrate);
        assert_eq!(config.load_balancing.migration_threshold_percent, 90);
        assert_eq!(config.topics.pattern, "minecraft.server.*");
        assert_eq!(config.transport.url, "nats://localhost:4222");
        assert!(config.groups.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = DynamoConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.registry.health_timeout_seconds, 30);
        assert_eq!(config.topics.register, "minecraft.server.register");
    }

    #[test]
    fn test_parse_sample() {
        let config = DynamoConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.registry.health_timeout(), Duration::from_secs(45));
        assert_eq!(config.load_balancing.default_group, "hub");
        assert!(!config.load_balancing.auto_migrate);

        let hub = config.group_policy("hub");
        assert_eq!(hub.strategy, LoadBalancingStrategy::LeastPlayers);
        assert_eq!(hub.fallback_backend.as_deref(), Some("hub-1"));
        assert_eq!(hub.priority, 3);

        // Unrecognised strategies degrade to round-robin
        let arena = config.group_policy("arena");
        assert_eq!(arena.strategy, LoadBalancingStrategy::RoundRobin);
        assert_eq!(arena.priority, 1);

        let unknown = config.group_policy("missing");
        assert_eq!(unknown.strategy, LoadBalancingStrategy::RoundRobin);
        assert!(unknown.fallback_backend.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_legacy_keys() {
        let yaml = r#"
nats:
  url: nats://bus:4222
  connection-timeout: 3000
  reconnect-timeout: 500
  max-reconnect-attempts: 4
proxy:
  server-timeout: 40
  cleanup-interval: 10
load-balancing:
  default-group: hub
  migration-threshold: 80
"#;
        let config = DynamoConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.transport.url, "nats://bus:4222");
        assert_eq!(config.transport.connect_timeout_ms, 3000);
        assert_eq!(config.transport.reconnect_wait_ms, 500);
        assert_eq!(config.transport.max_reconnect_attempts, 4);
        assert_eq!(config.registry.health_timeout(), Duration::from_secs(40));
        assert_eq!(config.registry.sweep_interval(), Duration::from_secs(10));
        assert_eq!(config.load_balancing.migration_threshold_percent, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = DynamoConfig::default();
        config.registry.health_timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_threshold_over_100() {
        let mut config = DynamoConfig::default();
        config.load_balancing.migration_threshold_percent = 150;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_subject() {
        let mut config = DynamoConfig::default();
        config.topics.pattern = "minecraft..*".to_string();
        assert!(config.validate().is_err());

        config.topics.pattern = "minecraft server".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_announce_heartbeat_shorter_than_timeout() {
        let yaml = r#"
announce:
  name: lobby-1
  host: 10.0.0.1
  heartbeat-interval-seconds: 30
"#;
        let config = DynamoConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());

        let mut config = config;
        if let Some(announce) = config.announce.as_mut() {
            announce.heartbeat_interval_seconds = 10;
        }
        assert!(config.validate().is_ok());
        let announce = config.announce.unwrap();
        assert_eq!(announce.port, 25565);
        assert_eq!(announce.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = DynamoConfig::from_file(file.path()).unwrap();
        assert_eq!(config.load_balancing.migration_threshold_percent, 75);
    }

    #[test]
    fn test_from_missing_file() {
        let result = DynamoConfig::from_file("/nonexistent/dynamo/config.yml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_parse_error() {
        let result = DynamoConfig::from_yaml_str("registry: [1, 2");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}

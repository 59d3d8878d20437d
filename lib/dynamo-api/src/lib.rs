//! Dynamo configuration schema
//!
//! This library defines the typed configuration shared by every component:
//! - DynamoConfig: the root document, loaded from YAML and validated once
//! - GroupPolicy: per-group strategy, fallback backend and priority
//! - LoadBalancingStrategy: the selection strategies understood by the balancer

pub mod config;
pub mod strategy;

pub use config::{
    AnnounceSettings, BalancingSettings, ConfigError, DynamoConfig, GroupPolicy,
    RegistrySettings, TopicsConfig, TransportSettings,
};
pub use strategy::LoadBalancingStrategy;

//! Load balancing strategy identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy used to pick one backend among the healthy members of a group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LoadBalancingStrategy {
    /// Cycle through healthy backends with a per-group counter
    #[default]
    RoundRobin,
    /// Pick the backend with the lowest player ratio
    LeastPlayers,
    /// Pick a healthy backend uniformly at random
    Random,
    /// Pick the first healthy backend in name order
    FirstAvailable,
}

impl LoadBalancingStrategy {
    /// Canonical configuration name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingStrategy::RoundRobin => "ROUND_ROBIN",
            LoadBalancingStrategy::LeastPlayers => "LEAST_PLAYERS",
            LoadBalancingStrategy::Random => "RANDOM",
            LoadBalancingStrategy::FirstAvailable => "FIRST_AVAILABLE",
        }
    }

    /// Parse a strategy name, returning `None` when it is not recognised.
    ///
    /// Matching ignores case and treats `-` and `_` alike, so
    /// `least-players` and `LEAST_PLAYERS` are the same strategy.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "ROUND_ROBIN" => Some(LoadBalancingStrategy::RoundRobin),
            "LEAST_PLAYERS" => Some(LoadBalancingStrategy::LeastPlayers),
            "RANDOM" => Some(LoadBalancingStrategy::Random),
            "FIRST_AVAILABLE" => Some(LoadBalancingStrategy::FirstAvailable),
            _ => None,
        }
    }
}

// Unknown names fall back to round-robin instead of failing the whole config.
impl From<&str> for LoadBalancingStrategy {
    fn from(name: &str) -> Self {
        Self::parse(name).unwrap_or_default()
    }
}

impl From<String> for LoadBalancingStrategy {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<LoadBalancingStrategy> for String {
    fn from(strategy: LoadBalancingStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Hooks for the host that mirrors the registry into its own server catalog

use crate::backend::Backend;
use std::fmt;

/// Why a backend left the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    Unregistered,
    Expired,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalReason::Unregistered => f.write_str("unregistered"),
            RemovalReason::Expired => f.write_str("expired"),
        }
    }
}

/// Notified after the registry changes membership.
///
/// Called from the event loop and the sweeper task; implementations must not
/// block.
pub trait BackendListener: Send + Sync {
    /// A name that was absent is now registered
    fn on_registered(&self, _backend: &Backend) {}

    /// A name left the registry
    fn on_removed(&self, _name: &str, _reason: RemovalReason) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl BackendListener for NoopListener {}

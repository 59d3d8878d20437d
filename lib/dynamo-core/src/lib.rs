//! Core registry functionality for game-server backends
//!
//! This library provides:
//! - Backend and lifecycle event model with a MessagePack wire codec
//! - Backend registry fed by lifecycle events
//! - Expiry sweeper and host listener hooks
//! - Prometheus metrics shared with the balancer

pub mod backend;
pub mod clock;
pub mod codec;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod sweeper;

pub use backend::Backend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, DecodeError, EncodeError, Result, ValidationError};
pub use event::{EventKind, Lifecycle, LifecycleEvent};
pub use listener::{BackendListener, NoopListener, RemovalReason};
pub use metrics::DynamoMetrics;
pub use registry::{ApplyOutcome, BackendRegistry};
pub use sweeper::{ExpirySweeper, SweeperConfig};

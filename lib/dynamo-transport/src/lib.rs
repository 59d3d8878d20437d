//! Message bus plumbing for the backend registry
//!
//! - [`Transport`]: abstract pub/sub with wildcard subject patterns
//! - [`InMemoryTransport`]: in-process bus
//! - [`DiscoveryService`]: feeds bus events into the registry and runs the sweeper
//! - [`BackendAnnouncer`]: publishes a backend's own lifecycle

pub mod announcer;
pub mod discovery;
pub mod error;
pub mod memory;
pub mod subject;
pub mod transport;

pub use announcer::BackendAnnouncer;
pub use discovery::{DiscoveryService, EventHandler};
pub use error::{Result, TransportError};
pub use memory::InMemoryTransport;
pub use subject::SubjectPattern;
pub use transport::{Message, MessageStream, Transport};

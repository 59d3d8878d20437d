//! Abstract pub/sub transport

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A payload received on a subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Messages delivered to one subscription
pub type MessageStream = BoxStream<'static, Message>;

/// Message bus used by the registry and by announcing backends.
///
/// Delivery is at-least-once with no ordering across subjects. Connection
/// management belongs to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to every subject matching `pattern`. The stream ends when
    /// the transport shuts down.
    async fn subscribe(&self, pattern: &str) -> Result<MessageStream>;

    fn is_connected(&self) -> bool;
}

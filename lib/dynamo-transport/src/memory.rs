//! In-process transport

use crate::error::{Result, TransportError};
use crate::subject::{validate_subject, SubjectPattern};
use crate::transport::{Message, MessageStream, Transport};
use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

struct Subscription {
    pattern: SubjectPattern,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    subscriptions: Mutex<Vec<Subscription>>,
    disconnected: AtomicBool,
}

/// Transport that delivers messages between tasks of one process.
///
/// Clones share the same bus. `set_connected(false)` makes every publish and
/// subscribe fail until the bus is reconnected.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining the connection
    pub fn set_connected(&self, connected: bool) {
        self.inner.disconnected.store(!connected, Ordering::SeqCst);
        debug!("In-memory transport connected: {}", connected);
    }

    /// Drop every subscription, ending their streams
    pub fn close(&self) {
        self.subscriptions().clear();
    }

    pub fn subscription_count(&self) -> usize {
        let mut subscriptions = self.subscriptions();
        subscriptions.retain(|sub| !sub.sender.is_closed());
        subscriptions.len()
    }

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        validate_subject(subject)?;

        let mut subscriptions = self.subscriptions();
        // Receivers that went away are pruned on the way
        subscriptions.retain(|sub| {
            if !sub.pattern.matches(subject) {
                return !sub.sender.is_closed();
            }
            let message = Message {
                subject: subject.to_string(),
                payload: payload.clone(),
            };
            sub.sender.send(message).is_ok()
        });
        trace!("Published {} bytes on {}", payload.len(), subject);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<MessageStream> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let pattern = SubjectPattern::new(pattern)?;
        let (sender, receiver) = mpsc::unbounded_channel();

        debug!("Subscribed to {}", pattern);
        self.subscriptions().push(Subscription { pattern, sender });

        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        Ok(Box::pin(stream))
    }

    fn is_connected(&self) -> bool {
        !self.inner.disconnected.load(Ordering::SeqCst)
    }
}

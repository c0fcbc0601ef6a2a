/// Subscriber handles
///
/// A subscriber is an opaque handle to a live connection. The hub only needs
/// to hand it an envelope; the transport behind it is external.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::message::Envelope;
use crate::errors::DeliveryError;

/// Subscriber ID (unique per hub)
pub type SubscriberId = u64;

#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Hand one envelope to the connection
    ///
    /// May wait for the connection to make room; the hub bounds the wait.
    async fn deliver(&self, envelope: Arc<Envelope>) -> Result<(), DeliveryError>;

    /// Called once the hub has evicted this subscriber
    fn evicted(&self) {}
}

/// Subscriber backed by a bounded queue
///
/// The connection task owns the receiving half and forwards envelopes to its
/// socket. Dropping the receiver closes the subscriber; eviction closes the
/// queue so the receiver sees the end of the stream.
pub struct QueueSubscriber {
    id: SubscriberId,
    sender: Mutex<Option<mpsc::Sender<Arc<Envelope>>>>,
}

impl QueueSubscriber {
    pub fn new(id: SubscriberId, queue_size: usize) -> (Arc<Self>, mpsc::Receiver<Arc<Envelope>>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        (
            Arc::new(Self {
                id,
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .map(|sender| sender.is_closed())
            .unwrap_or(true)
    }
}

#[async_trait]
impl Subscriber for QueueSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    async fn deliver(&self, envelope: Arc<Envelope>) -> Result<(), DeliveryError> {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => sender.send(envelope).await.map_err(|_| DeliveryError::Closed),
            None => Err(DeliveryError::Closed),
        }
    }

    fn evicted(&self) {
        self.sender.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_eviction_ends_the_stream() {
        let (subscriber, mut receiver) = QueueSubscriber::new(1, 4);
        subscriber
            .deliver(Arc::new(Envelope::new("robot", 1, json!({}))))
            .await
            .expect("deliver");

        subscriber.evicted();
        assert!(subscriber.is_closed());
        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());

        let result = subscriber
            .deliver(Arc::new(Envelope::new("robot", 2, json!({}))))
            .await;
        assert_eq!(result, Err(DeliveryError::Closed));
    }
}

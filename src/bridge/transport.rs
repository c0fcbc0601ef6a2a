/// Broker transport seam
///
/// The bridge speaks to the broker only through [`BrokerTransport`]. The wire
/// protocol lives behind it. [`LoopbackTransport`] is an in-process broker for
/// tests and broker-less deployments.
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::topics::topic_matches_filter;
use super::QoS;
use crate::errors::{BridgeError, BridgeResult};

/// One message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open the broker session; inbound messages go to `inbound`
    async fn connect(&self, inbound: mpsc::Sender<InboundMessage>) -> BridgeResult<()>;

    async fn disconnect(&self) -> BridgeResult<()>;

    /// Ask the broker for messages matching a topic filter
    async fn subscribe(&self, filter: &str, qos: QoS) -> BridgeResult<()>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> BridgeResult<()>;
}

// ============================================================================
// LOOPBACK TRANSPORT
// ============================================================================

/// In-process broker
///
/// Published messages are recorded and routed back inbound when they match a
/// subscribed filter. [`LoopbackTransport::inject`] plays the device side.
#[derive(Default)]
pub struct LoopbackTransport {
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    filters: RwLock<Vec<String>>,
    published: Mutex<Vec<(InboundMessage, QoS)>>,
    stalled: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publish hang until switched back (simulates an unresponsive broker)
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Everything published so far, in order
    pub fn published(&self) -> Vec<(InboundMessage, QoS)> {
        self.published.lock().clone()
    }

    pub fn filters(&self) -> Vec<String> {
        self.filters.read().clone()
    }

    /// Deliver a device-originated message as if it came from the broker
    ///
    /// Returns false when not connected or no subscribed filter matches.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.route(InboundMessage::new(topic, payload)).await
    }

    async fn route(&self, message: InboundMessage) -> bool {
        let matches = self
            .filters
            .read()
            .iter()
            .any(|filter| topic_matches_filter(&message.topic, filter));
        if !matches {
            return false;
        }

        let sender = self.inbound.lock().clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl BrokerTransport for LoopbackTransport {
    async fn connect(&self, inbound: mpsc::Sender<InboundMessage>) -> BridgeResult<()> {
        *self.inbound.lock() = Some(inbound);
        Ok(())
    }

    async fn disconnect(&self) -> BridgeResult<()> {
        *self.inbound.lock() = None;
        Ok(())
    }

    async fn subscribe(&self, filter: &str, _qos: QoS) -> BridgeResult<()> {
        if self.inbound.lock().is_none() {
            return Err(BridgeError::NotConnected);
        }
        let mut filters = self.filters.write();
        if !filters.iter().any(|f| f == filter) {
            filters.push(filter.to_string());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> BridgeResult<()> {
        if self.inbound.lock().is_none() {
            return Err(BridgeError::NotConnected);
        }
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let message = InboundMessage::new(topic, payload);
        self.published.lock().push((message.clone(), qos));
        self.route(message).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_routes_matching_publishes() {
        let transport = LoopbackTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        transport.connect(tx).await.expect("connect");
        transport.subscribe("/fleet/+/telemetry/+", QoS::AtMostOnce).await.expect("subscribe");

        transport
            .publish("/fleet/r1/cmd_vel", b"{}".to_vec(), QoS::AtLeastOnce)
            .await
            .expect("publish");
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.published().len(), 1);

        assert!(transport.inject("/fleet/r1/telemetry/imu", "{\"ax\":1}").await);
        let message = rx.recv().await.expect("inbound");
        assert_eq!(message.topic, "/fleet/r1/telemetry/imu");
    }

    #[tokio::test]
    async fn test_loopback_requires_connection() {
        let transport = LoopbackTransport::new();
        let result = transport.publish("/fleet/r1/cmd_vel", Vec::new(), QoS::AtMostOnce).await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert!(!transport.inject("/fleet/r1/telemetry/imu", "{}").await);
    }
}

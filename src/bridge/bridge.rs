/// Message Bridge - broker session and topic dispatch
///
/// - `connect` / `disconnect` are idempotent and serialized
/// - `publish` fails fast with `NotConnected`; reconnecting is always an
///   explicit call, never a side effect of publishing
/// - one handler per topic pattern, a later registration replaces the earlier
/// - inbound messages with no matching handler are dropped and logged
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use super::topics::{parse_telemetry_topic, topic_matches_filter};
use super::transport::{BrokerTransport, InboundMessage};
use super::QoS;
use crate::config::BridgeConfig;
use crate::errors::{BridgeError, BridgeResult};
use crate::logger::{self, LogTag};
use crate::telemetry::TelemetryPipeline;

/// Callback invoked with the topic and the decoded payload
pub type HandlerFn = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handler bound to a topic pattern
#[derive(Clone)]
pub enum TopicHandler {
    /// Feed canonical telemetry topics into the pipeline
    Telemetry(Arc<TelemetryPipeline>),

    /// Arbitrary callback
    Callback(HandlerFn),
}

impl TopicHandler {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        TopicHandler::Callback(Arc::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            TopicHandler::Telemetry(_) => "telemetry",
            TopicHandler::Callback(_) => "callback",
        }
    }
}

/// Decode a broker payload; anything that is not JSON becomes `{"raw": text}`
pub fn coerce_payload(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ "raw": String::from_utf8_lossy(bytes) }),
    }
}

/// Optional position carried inside a telemetry payload
fn extract_position(payload: &Value) -> (Option<f64>, Option<f64>) {
    let field = |short: &str, long: &str| {
        payload
            .get(short)
            .or_else(|| payload.get(long))
            .and_then(Value::as_f64)
    };
    (field("lat", "latitude"), field("lon", "longitude"))
}

pub struct MessageBridge {
    transport: Arc<dyn BrokerTransport>,
    config: BridgeConfig,
    connected: AtomicBool,

    /// Serializes connect/disconnect
    lifecycle: tokio::sync::Mutex<()>,

    /// Pattern → handler, in registration order
    handlers: RwLock<Vec<(String, TopicHandler)>>,

    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,

    dispatched: AtomicU64,
    unhandled: AtomicU64,
}

impl MessageBridge {
    pub fn new(transport: Arc<dyn BrokerTransport>, config: &BridgeConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size.max(1));
        Arc::new(Self {
            transport,
            config: config.clone(),
            connected: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            handlers: RwLock::new(Vec::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            dispatched: AtomicU64::new(0),
            unhandled: AtomicU64::new(0),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Establish the broker session and subscribe every registered pattern
    pub async fn connect(&self) -> BridgeResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.transport.connect(self.inbound_tx.clone())).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BridgeError::ConnectTimeout {
                    timeout_ms: self.config.connect_timeout_ms,
                })
            }
        }

        let patterns: Vec<String> = self.handlers.read().iter().map(|(p, _)| p.clone()).collect();
        for pattern in &patterns {
            if let Err(e) = self.transport.subscribe(pattern, self.config.default_qos).await {
                logger::error(
                    LogTag::Bridge,
                    &format!("Failed to subscribe '{}' after connect: {}", pattern, e),
                );
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        logger::info(
            LogTag::Bridge,
            &format!("Connected to broker ({} topic patterns)", patterns.len()),
        );
        Ok(())
    }

    /// Tear down the broker session
    pub async fn disconnect(&self) -> BridgeResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_connected() {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);
        self.transport.disconnect().await?;
        logger::info(LogTag::Bridge, "Disconnected from broker");
        Ok(())
    }

    /// Serialize and publish, bounded by the publish deadline
    ///
    /// A publish that misses the deadline marks the connection failed.
    pub async fn publish(&self, topic: &str, payload: &Value, qos: QoS) -> BridgeResult<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let bytes = serde_json::to_vec(payload)?;

        let timeout = self.config.publish_timeout();
        match tokio::time::timeout(timeout, self.transport.publish(topic, bytes, qos)).await {
            Ok(Ok(())) => {
                logger::debug(LogTag::Bridge, &format!("Published to {}", topic));
                Ok(())
            }
            Ok(Err(e)) => {
                logger::error(LogTag::Bridge, &format!("Publish to {} failed: {}", topic, e));
                Err(e)
            }
            Err(_) => {
                self.connected.store(false, Ordering::SeqCst);
                logger::error(
                    LogTag::Bridge,
                    &format!(
                        "Publish to {} timed out after {}ms, connection marked failed",
                        topic, self.config.publish_timeout_ms
                    ),
                );
                Err(BridgeError::PublishTimeout {
                    topic: topic.to_string(),
                    timeout_ms: self.config.publish_timeout_ms,
                })
            }
        }
    }

    /// Bind a handler to a topic pattern, replacing any earlier one
    pub async fn register_handler(&self, pattern: &str, handler: TopicHandler) -> BridgeResult<()> {
        let kind = handler.kind();
        let replaced = {
            let mut handlers = self.handlers.write();
            match handlers.iter_mut().find(|(p, _)| p == pattern) {
                Some(entry) => {
                    entry.1 = handler;
                    true
                }
                None => {
                    handlers.push((pattern.to_string(), handler));
                    false
                }
            }
        };

        logger::debug(
            LogTag::Bridge,
            &format!(
                "{} {} handler for '{}'",
                if replaced { "Replaced" } else { "Registered" },
                kind,
                pattern
            ),
        );

        if !replaced && self.is_connected() {
            self.transport.subscribe(pattern, self.config.default_qos).await?;
        }
        Ok(())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Exact pattern first, then the first matching wildcard in registration order
    fn resolve(&self, topic: &str) -> Option<TopicHandler> {
        let handlers = self.handlers.read();
        handlers
            .iter()
            .find(|(pattern, _)| pattern == topic)
            .or_else(|| handlers.iter().find(|(pattern, _)| topic_matches_filter(topic, pattern)))
            .map(|(_, handler)| handler.clone())
    }

    /// Route one inbound message; returns false when it was dropped
    pub async fn dispatch(&self, message: InboundMessage) -> bool {
        let handler = match self.resolve(&message.topic) {
            Some(handler) => handler,
            None => {
                self.unhandled.fetch_add(1, Ordering::Relaxed);
                logger::info(
                    LogTag::Bridge,
                    &format!("No handler for topic {}, message dropped", message.topic),
                );
                return false;
            }
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let payload = coerce_payload(&message.payload);

        match handler {
            TopicHandler::Telemetry(pipeline) => match parse_telemetry_topic(&message.topic) {
                Some(parsed) => {
                    let (lat, lon) = extract_position(&payload);
                    pipeline
                        .ingest(&parsed.device_id, &parsed.sensor_type, payload, lat, lon)
                        .await;
                    true
                }
                None => {
                    logger::warning(
                        LogTag::Bridge,
                        &format!("Topic {} is not a telemetry topic, message dropped", message.topic),
                    );
                    false
                }
            },
            TopicHandler::Callback(callback) => {
                callback(&message.topic, &payload);
                true
            }
        }
    }

    /// Inbound dispatch loop; runs until shutdown
    ///
    /// Messages are handled one at a time so a device's messages keep their
    /// arrival order.
    pub async fn run_dispatch(self: Arc<Self>, shutdown: Arc<Notify>) {
        let receiver = self.inbound_rx.lock().take();
        let mut receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                logger::error(LogTag::Bridge, "Inbound dispatch loop already running");
                return;
            }
        };

        let notified = shutdown.notified();
        tokio::pin!(notified);

        loop {
            tokio::select! {
                _ = &mut notified => {
                    logger::debug(LogTag::Bridge, "Inbound dispatch loop stopping");
                    break;
                }
                message = receiver.recv() => match message {
                    Some(message) => {
                        self.dispatch(message).await;
                    }
                    None => break,
                },
            }
        }

        *self.inbound_rx.lock() = Some(receiver);
    }

    /// (dispatched, unhandled) counters
    pub fn stats(&self) -> (u64, u64) {
        (
            self.dispatched.load(Ordering::Relaxed),
            self.unhandled.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LoopbackTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config() -> BridgeConfig {
        BridgeConfig {
            publish_timeout_ms: 50,
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let bridge = MessageBridge::new(Arc::new(LoopbackTransport::new()), &config());
        let result = bridge.publish("/fleet/r1/cmd_vel", &json!({}), QoS::AtLeastOnce).await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_idempotent() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = MessageBridge::new(transport.clone(), &config());

        bridge.disconnect().await.expect("disconnect while idle");
        bridge.connect().await.expect("connect");
        bridge.connect().await.expect("connect again");
        assert!(bridge.is_connected());

        bridge
            .publish("/fleet/r1/cmd_vel", &json!({"linear": 1.0}), QoS::AtLeastOnce)
            .await
            .expect("publish");
        assert_eq!(transport.published().len(), 1);

        bridge.disconnect().await.expect("disconnect");
        bridge.disconnect().await.expect("disconnect again");
        assert!(!bridge.is_connected());
    }

    #[tokio::test]
    async fn test_publish_timeout_marks_connection_failed() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = MessageBridge::new(transport.clone(), &config());
        bridge.connect().await.expect("connect");
        transport.set_stalled(true);

        let result = bridge.publish("/fleet/r1/cmd_vel", &json!({}), QoS::AtMostOnce).await;
        assert!(matches!(result, Err(BridgeError::PublishTimeout { timeout_ms: 50, .. })));
        assert!(!bridge.is_connected());

        let again = bridge.publish("/fleet/r1/cmd_vel", &json!({}), QoS::AtMostOnce).await;
        assert!(matches!(again, Err(BridgeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_later_registration_replaces_handler() {
        let bridge = MessageBridge::new(Arc::new(LoopbackTransport::new()), &config());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        bridge
            .register_handler("/fleet/+/status", TopicHandler::callback(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("register");
        let counter = second.clone();
        bridge
            .register_handler("/fleet/+/status", TopicHandler::callback(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("register");

        assert_eq!(bridge.handler_count(), 1);
        assert!(bridge.dispatch(InboundMessage::new("/fleet/r1/status", "{}")).await);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_topic_is_dropped() {
        let bridge = MessageBridge::new(Arc::new(LoopbackTransport::new()), &config());
        assert!(!bridge.dispatch(InboundMessage::new("/fleet/r1/unknown", "{}")).await);
        assert_eq!(bridge.stats(), (0, 1));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_coerced() {
        assert_eq!(coerce_payload(b"{\"ax\":1.0}"), json!({"ax": 1.0}));
        assert_eq!(coerce_payload(b"not json"), json!({"raw": "not json"}));

        let bridge = MessageBridge::new(Arc::new(LoopbackTransport::new()), &config());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bridge
            .register_handler("#", TopicHandler::callback(move |_, payload| {
                *sink.lock() = Some(payload.clone());
            }))
            .await
            .expect("register");

        bridge.dispatch(InboundMessage::new("/fleet/r1/log", "plain text")).await;
        assert_eq!(seen.lock().clone(), Some(json!({"raw": "plain text"})));
    }

    #[test]
    fn test_position_extraction() {
        assert_eq!(
            extract_position(&json!({"lat": 52.1, "lon": 4.3})),
            (Some(52.1), Some(4.3))
        );
        assert_eq!(
            extract_position(&json!({"latitude": 1.5, "longitude": 2.5})),
            (Some(1.5), Some(2.5))
        );
        assert_eq!(extract_position(&json!({"raw": "x"})), (None, None));
    }

    #[tokio::test]
    async fn test_dispatch_loop_delivers_injected_messages() {
        let transport = Arc::new(LoopbackTransport::new());
        let bridge = MessageBridge::new(transport.clone(), &config());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bridge
            .register_handler("/fleet/+/status", TopicHandler::callback(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("register");
        bridge.connect().await.expect("connect");
        assert_eq!(transport.filters(), vec!["/fleet/+/status".to_string()]);

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(bridge.clone().run_dispatch(shutdown.clone()));

        assert!(transport.inject("/fleet/r1/status", "{\"ok\":true}").await);
        for _ in 0..50 {
            if hits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        shutdown.notify_waiters();
        handle.await.expect("dispatch loop exits");
    }
}

/// Broadcast Hub - channel registry and fan-out
///
/// The hub manages:
/// - Per-channel subscriber sets, each behind its own lock
/// - Per-channel sequence counters
/// - Deadline-bounded concurrent delivery with eviction of failed subscribers
/// - Hub-level metrics
///
/// A broadcast delivers to the subscriber snapshot taken when the call starts.
/// A subscribe racing with a broadcast is either fully in that snapshot or not
/// in it at all.
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::message::Envelope;
use super::metrics::HubMetrics;
use super::subscriber::{QueueSubscriber, Subscriber, SubscriberId};
use crate::config::HubConfig;
use crate::errors::DeliveryError;
use crate::logger::{self, LogTag};

// ============================================================================
// HUB TYPES
// ============================================================================

#[derive(Default)]
struct ChannelState {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    seq: AtomicU64,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sequence number stamped on the envelope (0 when nobody was listening)
    pub seq: u64,
    pub delivered: usize,
    pub evicted: Vec<SubscriberId>,
}

// ============================================================================
// BROADCAST HUB
// ============================================================================

pub struct BroadcastHub {
    /// Channel name → subscriber set
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,

    /// Next subscriber ID
    next_subscriber_id: AtomicU64,

    /// Per-subscriber delivery deadline
    delivery_timeout: Duration,

    /// Queue depth for queue-backed subscribers
    queue_size: usize,

    metrics: Arc<HubMetrics>,
}

impl BroadcastHub {
    pub fn new(config: &HubConfig) -> Arc<Self> {
        Self::with_settings(config.delivery_timeout(), config.subscriber_queue_size)
    }

    pub fn with_settings(delivery_timeout: Duration, queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            delivery_timeout,
            queue_size: queue_size.max(1),
            metrics: HubMetrics::new(),
        })
    }

    /// Allocate a subscriber ID unique within this hub
    pub fn next_subscriber_id(&self) -> SubscriberId {
        self.next_subscriber_id.fetch_add(1, Ordering::Relaxed)
    }

    fn channel(&self, channel: &str) -> Arc<ChannelState> {
        if let Some(state) = self.channels.read().get(channel) {
            return state.clone();
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .clone()
    }

    /// Register a subscriber under a channel
    ///
    /// Returns false when the subscriber was already registered there.
    pub fn subscribe(&self, channel: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        let state = self.channel(channel);
        let id = subscriber.id();
        let mut subscribers = state.subscribers.lock();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, subscriber);
        drop(subscribers);

        self.metrics.subscribed();
        logger::debug(
            LogTag::Hub,
            &format!("Subscriber {} joined channel '{}'", id, channel),
        );
        true
    }

    /// Remove a subscriber from a channel
    ///
    /// Returns false when it was not registered (no-op).
    pub fn unsubscribe(&self, channel: &str, subscriber_id: SubscriberId) -> bool {
        let state = match self.channels.read().get(channel) {
            Some(state) => state.clone(),
            None => return false,
        };
        let removed = state.subscribers.lock().remove(&subscriber_id).is_some();
        if removed {
            self.metrics.unsubscribed();
            logger::debug(
                LogTag::Hub,
                &format!("Subscriber {} left channel '{}'", subscriber_id, channel),
            );
        }
        removed
    }

    /// New queue-backed subscriber sized from hub settings, not yet registered
    pub fn queue_subscriber(&self) -> (Arc<QueueSubscriber>, mpsc::Receiver<Arc<Envelope>>) {
        QueueSubscriber::new(self.next_subscriber_id(), self.queue_size)
    }

    /// Register a new queue-backed subscriber and hand back its receiving half
    pub fn subscribe_queue(
        &self,
        channel: &str,
    ) -> (Arc<QueueSubscriber>, mpsc::Receiver<Arc<Envelope>>) {
        let (subscriber, receiver) = self.queue_subscriber();
        self.subscribe(channel, subscriber.clone());
        (subscriber, receiver)
    }

    /// Deliver `data` to every subscriber registered on `channel` right now
    ///
    /// Failed or slow subscribers are evicted; nothing is surfaced to the caller
    /// beyond the report.
    pub async fn broadcast(&self, channel: &str, data: serde_json::Value) -> BroadcastReport {
        let state = match self.channels.read().get(channel) {
            Some(state) => state.clone(),
            None => return BroadcastReport::default(),
        };

        // Snapshot and sequence under the same lock so seq order matches membership
        let (seq, targets) = {
            let subscribers = state.subscribers.lock();
            if subscribers.is_empty() {
                return BroadcastReport::default();
            }
            let seq = state.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let targets: Vec<Arc<dyn Subscriber>> = subscribers.values().cloned().collect();
            (seq, targets)
        };

        self.metrics.broadcast_started();
        let envelope = Arc::new(Envelope::new(channel, seq, data));
        let deadline = self.delivery_timeout;

        let results = join_all(targets.iter().map(|subscriber| {
            let envelope = envelope.clone();
            async move {
                match tokio::time::timeout(deadline, subscriber.deliver(envelope)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout {
                        timeout_ms: deadline.as_millis() as u64,
                    }),
                }
            }
        }))
        .await;

        let mut report = BroadcastReport {
            seq,
            ..BroadcastReport::default()
        };

        for (subscriber, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    if matches!(err, DeliveryError::Timeout { .. }) {
                        self.metrics.timed_out();
                        logger::warning(
                            LogTag::Hub,
                            &format!(
                                "Evicting subscriber {} from '{}': {}",
                                subscriber.id(),
                                channel,
                                err
                            ),
                        );
                    } else {
                        logger::debug(
                            LogTag::Hub,
                            &format!(
                                "Evicting subscriber {} from '{}': {}",
                                subscriber.id(),
                                channel,
                                err
                            ),
                        );
                    }
                    if state.subscribers.lock().remove(&subscriber.id()).is_some() {
                        self.metrics.unsubscribed();
                        self.metrics.evicted();
                        subscriber.evicted();
                    }
                    report.evicted.push(subscriber.id());
                }
            }
        }

        self.metrics.delivered(report.delivered as u64);
        report
    }

    /// Serialize and broadcast; serialization failures are logged and dropped
    pub async fn broadcast_value<T: Serialize>(&self, channel: &str, value: &T) -> BroadcastReport {
        match serde_json::to_value(value) {
            Ok(data) => self.broadcast(channel, data).await,
            Err(e) => {
                logger::error(
                    LogTag::Hub,
                    &format!("Failed to serialize message for '{}': {}", channel, e),
                );
                BroadcastReport::default()
            }
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|state| state.subscribers.lock().len())
            .unwrap_or(0)
    }

    /// Channels with at least one subscriber
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .filter(|(_, state)| !state.subscribers.lock().is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn metrics(&self) -> Arc<HubMetrics> {
        self.metrics.clone()
    }
}

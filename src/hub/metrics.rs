use serde::Serialize;
/// Hub metrics collection
///
/// Aggregate counters across all channels, for monitoring and debugging.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Hub-level metrics (thread-safe)
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Total subscriptions (lifetime)
    total_subscriptions: AtomicU64,

    /// Current active subscriptions
    active_subscriptions: AtomicUsize,

    /// Total broadcasts initiated
    broadcasts: AtomicU64,

    /// Total successful deliveries
    messages_delivered: AtomicU64,

    /// Subscribers removed because delivery failed
    evictions: AtomicU64,

    /// Deliveries abandoned at the deadline
    timeouts: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribed(&self) {
        self.total_subscriptions.fetch_add(1, Ordering::Relaxed);
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsubscribed(&self) {
        self.active_subscriptions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn broadcast_started(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            total_subscriptions: self.total_subscriptions.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Hub metrics snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubMetricsSnapshot {
    pub total_subscriptions: u64,
    pub active_subscriptions: usize,
    pub broadcasts: u64,
    pub messages_delivered: u64,
    pub evictions: u64,
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_metrics() {
        let metrics = HubMetrics::new();

        metrics.subscribed();
        metrics.subscribed();
        metrics.broadcast_started();
        metrics.delivered(2);
        metrics.timed_out();
        metrics.evicted();
        metrics.unsubscribed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_subscriptions, 2);
        assert_eq!(snapshot.active_subscriptions, 1);
        assert_eq!(snapshot.broadcasts, 1);
        assert_eq!(snapshot.messages_delivered, 2);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.timeouts, 1);
    }
}

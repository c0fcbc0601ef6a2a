/// Telemetry pipeline - admission, buffering and batched persistence
///
/// Flush rules:
/// - triggered when the buffer reaches capacity, on the periodic tick, or on
///   an explicit force-flush
/// - one flush in flight at a time; ingestion keeps filling a fresh buffer
///   while a snapshot drains
/// - all-or-nothing: a failed batch goes back to the front of the buffer for
///   the next trigger
/// - at most `max_retained` records are held; past that the oldest are dropped
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::types::{PipelineStats, TelemetryFrame, TelemetryRecord};
use crate::config::TelemetryConfig;
use crate::errors::PersistenceResult;
use crate::hub::{channels, BroadcastHub};
use crate::logger::{self, LogTag};
use crate::sessions::{Admission, SessionRegistry};
use crate::storage::TelemetryStore;

#[derive(Default)]
struct Counters {
    ingested: AtomicU64,
    persisted: AtomicU64,
    skipped: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    dropped: AtomicU64,
}

pub struct TelemetryPipeline {
    registry: Arc<SessionRegistry>,
    hub: Arc<BroadcastHub>,
    store: Arc<dyn TelemetryStore>,

    buffer: Mutex<Vec<TelemetryRecord>>,

    /// Held for the duration of a flush
    flush_lock: tokio::sync::Mutex<()>,

    capacity: usize,
    max_retained: usize,
    flush_after_ingest: bool,
    counters: Counters,
}

impl TelemetryPipeline {
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: Arc<BroadcastHub>,
        store: Arc<dyn TelemetryStore>,
        config: &TelemetryConfig,
    ) -> Arc<Self> {
        let capacity = config.buffer_capacity.max(1);
        Arc::new(Self {
            registry,
            hub,
            store,
            buffer: Mutex::new(Vec::with_capacity(capacity)),
            flush_lock: tokio::sync::Mutex::new(()),
            capacity,
            max_retained: config.max_retained.max(capacity),
            flush_after_ingest: config.flush_after_ingest,
            counters: Counters::default(),
        })
    }

    /// Accept one telemetry sample
    ///
    /// Never fails: samples without an admitting session are simply not
    /// persisted, and broadcast problems stay inside the hub.
    pub async fn ingest(
        &self,
        device_id: &str,
        sensor_type: &str,
        payload: Value,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> Admission {
        self.counters.ingested.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now();
        let admission = self.registry.admit(device_id, sensor_type, timestamp).await;

        let reached_capacity = match admission {
            Admission::Accepted(session_id) => {
                let record = TelemetryRecord {
                    device_id: device_id.to_string(),
                    sensor_type: sensor_type.to_string(),
                    payload: payload.clone(),
                    timestamp,
                    session_id: Some(session_id),
                    latitude: lat,
                    longitude: lon,
                };
                let mut buffer = self.buffer.lock();
                buffer.push(record);
                self.enforce_bound(&mut buffer);
                buffer.len() >= self.capacity
            }
            skipped => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                if logger::is_debug_enabled(LogTag::Telemetry) {
                    logger::debug(
                        LogTag::Telemetry,
                        &format!("{}/{} not persisted: {:?}", device_id, sensor_type, skipped),
                    );
                }
                false
            }
        };

        let frame = TelemetryFrame {
            device_id: device_id.to_string(),
            sensor_type: sensor_type.to_string(),
            payload,
            lat,
            lon,
        };
        self.hub.broadcast_value(channels::TELEMETRY, &frame).await;

        if reached_capacity {
            self.flush_if_idle().await;
        } else if self.flush_after_ingest && admission.session_id().is_some() {
            let _ = self.force_flush().await;
        }

        admission
    }

    /// Drop the oldest records beyond `max_retained`
    fn enforce_bound(&self, buffer: &mut Vec<TelemetryRecord>) {
        if buffer.len() <= self.max_retained {
            return;
        }
        let excess = buffer.len() - self.max_retained;
        buffer.drain(..excess);
        self.counters.dropped.fetch_add(excess as u64, Ordering::Relaxed);
        logger::warning(
            LogTag::Telemetry,
            &format!(
                "Telemetry buffer over {} records, dropped {} oldest",
                self.max_retained, excess
            ),
        );
    }

    /// Capacity trigger: skip when a flush is already draining
    async fn flush_if_idle(&self) {
        let guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let _ = self.flush_locked(guard).await;
    }

    /// Write every buffered record as one batch
    ///
    /// Waits for an in-flight flush to finish first. Returns the number of
    /// records written.
    pub async fn flush(&self) -> PersistenceResult<usize> {
        let guard = self.flush_lock.lock().await;
        self.flush_locked(guard).await
    }

    /// Explicit flush request (shutdown, low-traffic deployments)
    pub async fn force_flush(&self) -> PersistenceResult<usize> {
        let written = self.flush().await?;
        if written > 0 {
            logger::info(
                LogTag::Telemetry,
                &format!("Force-flushed {} telemetry records", written),
            );
        }
        Ok(written)
    }

    async fn flush_locked(&self, _guard: tokio::sync::MutexGuard<'_, ()>) -> PersistenceResult<usize> {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.insert_batch(&batch).await {
            Ok(written) => {
                self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .persisted
                    .fetch_add(written as u64, Ordering::Relaxed);
                logger::debug(
                    LogTag::Telemetry,
                    &format!("Flushed {} telemetry records", written),
                );
                Ok(written)
            }
            Err(e) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let retained = batch.len();
                {
                    let mut buffer = self.buffer.lock();
                    let newer = std::mem::replace(&mut *buffer, batch);
                    buffer.extend(newer);
                    self.enforce_bound(&mut buffer);
                }
                logger::error(
                    LogTag::Telemetry,
                    &format!(
                        "Telemetry flush failed, {} records kept for retry: {}",
                        retained, e
                    ),
                );
                Err(e)
            }
        }
    }

    /// Periodic flush until shutdown, then one final force-flush
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, shutdown: Arc<Notify>) {
        let notified = shutdown.notified();
        tokio::pin!(notified);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut notified => break,
                _ = ticker.tick() => {
                    let _ = self.flush().await;
                }
            }
        }

        if let Err(e) = self.force_flush().await {
            logger::error(
                LogTag::Telemetry,
                &format!("Final telemetry flush failed, {} records lost: {}", self.buffered(), e),
            );
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ingested: self.counters.ingested.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            failed_flushes: self.counters.failed_flushes.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            buffered: self.buffered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionsConfig;
    use crate::sessions::SessionConfig;
    use crate::storage::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<SessionRegistry>,
        hub: Arc<BroadcastHub>,
        pipeline: Arc<TelemetryPipeline>,
    }

    fn fixture(capacity: usize, max_retained: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone(), store.clone(), &SessionsConfig::default());
        let hub = BroadcastHub::with_settings(Duration::from_millis(100), 64);
        let config = TelemetryConfig {
            buffer_capacity: capacity,
            max_retained,
            ..TelemetryConfig::default()
        };
        let pipeline = TelemetryPipeline::new(registry.clone(), hub.clone(), store.clone(), &config);
        Fixture {
            store,
            registry,
            hub,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_capacity_triggers_single_flush() {
        let f = fixture(3, 100);
        f.registry
            .start_session("r1", SessionConfig::default())
            .await
            .expect("start");

        for i in 0..3 {
            f.pipeline.ingest("r1", "imu", json!({ "i": i }), None, None).await;
        }

        assert_eq!(f.store.batch_sizes(), vec![3]);
        assert_eq!(f.pipeline.buffered(), 0);
        let stats = f.pipeline.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.persisted, 3);
    }

    #[tokio::test]
    async fn test_failed_flush_retains_records() {
        let f = fixture(3, 100);
        f.registry
            .start_session("r1", SessionConfig::default())
            .await
            .expect("start");
        f.store.set_fail_inserts(true);

        for i in 0..3 {
            f.pipeline.ingest("r1", "imu", json!({ "i": i }), None, None).await;
        }
        assert_eq!(f.store.failed_inserts(), 1);
        assert_eq!(f.pipeline.buffered(), 3);
        assert!(f.store.telemetry().is_empty());

        f.store.set_fail_inserts(false);
        assert_eq!(f.pipeline.force_flush().await.expect("retry"), 3);
        let rows = f.store.telemetry();
        let order: Vec<i64> = rows.iter().filter_map(|r| r.payload["i"].as_i64()).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(f.pipeline.stats().failed_flushes, 1);
    }

    #[tokio::test]
    async fn test_retention_bound_drops_oldest() {
        let f = fixture(2, 3);
        f.registry
            .start_session("r1", SessionConfig::default())
            .await
            .expect("start");
        f.store.set_fail_inserts(true);

        for i in 0..5 {
            f.pipeline.ingest("r1", "imu", json!({ "i": i }), None, None).await;
        }
        assert_eq!(f.pipeline.buffered(), 3);
        assert_eq!(f.pipeline.stats().dropped, 2);

        f.store.set_fail_inserts(false);
        f.pipeline.force_flush().await.expect("flush");
        let kept: Vec<i64> = f
            .store
            .telemetry()
            .iter()
            .filter_map(|r| r.payload["i"].as_i64())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_unrecorded_telemetry_is_still_broadcast() {
        let f = fixture(10, 100);
        let (_sub, mut rx) = f.hub.subscribe_queue(channels::TELEMETRY);

        let admission = f
            .pipeline
            .ingest("r9", "gps", json!({"fix": true}), Some(52.0), Some(4.0))
            .await;
        assert_eq!(admission, Admission::NoActiveSession);

        let envelope = rx.recv().await.expect("broadcast");
        assert_eq!(envelope.data["device_id"], "r9");
        assert_eq!(envelope.data["lat"], 52.0);
        assert_eq!(f.pipeline.buffered(), 0);
        assert_eq!(f.pipeline.force_flush().await.expect("flush"), 0);
        assert!(f.store.telemetry().is_empty());
    }

    #[tokio::test]
    async fn test_flush_after_ingest() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone(), store.clone(), &SessionsConfig::default());
        let hub = BroadcastHub::with_settings(Duration::from_millis(100), 8);
        let config = TelemetryConfig {
            flush_after_ingest: true,
            ..TelemetryConfig::default()
        };
        let pipeline = TelemetryPipeline::new(registry.clone(), hub, store.clone(), &config);
        registry
            .start_session("r1", SessionConfig::default())
            .await
            .expect("start");

        pipeline.ingest("r1", "imu", json!({}), None, None).await;
        assert_eq!(store.telemetry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_and_final_flush() {
        let f = fixture(100, 1000);
        f.registry
            .start_session("r1", SessionConfig::default())
            .await
            .expect("start");
        f.pipeline.ingest("r1", "imu", json!({"i": 0}), None, None).await;

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(
            f.pipeline
                .clone()
                .run_periodic(Duration::from_millis(500), shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.store.telemetry().len(), 1);

        f.pipeline.ingest("r1", "imu", json!({"i": 1}), None, None).await;
        shutdown.notify_waiters();
        handle.await.expect("flush task exits");
        assert_eq!(f.store.telemetry().len(), 2);
    }
}

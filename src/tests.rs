//! End-to-end behaviour across hub, registry, pipeline and job queue

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::app::{App, Stores};
use crate::bridge::topics::telemetry_topic;
use crate::bridge::LoopbackTransport;
use crate::config::Config;
use crate::errors::SessionError;
use crate::hub::{channels, Envelope};
use crate::jobs::{JobSpec, JobStatus, TrainingRunner};
use crate::services::Service;
use crate::services::implementations::BridgeService;
use crate::sessions::{EndMode, SessionConfig};
use crate::storage::MemoryStore;

struct Harness {
    app: App,
    store: Arc<MemoryStore>,
    transport: Arc<LoopbackTransport>,
}

fn harness(buffer_capacity: usize) -> Harness {
    let mut config = Config::default();
    config.telemetry.buffer_capacity = buffer_capacity;
    config.hub.delivery_timeout_ms = 200;

    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(LoopbackTransport::new());
    let app = App::with_parts(config, Stores::memory(store.clone()), transport.clone());
    app.jobs
        .register_runner("training", Arc::new(TrainingRunner::new(Duration::from_millis(1))));
    Harness {
        app,
        store,
        transport,
    }
}

async fn next(rx: &mut mpsc::Receiver<Arc<Envelope>>) -> Arc<Envelope> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message within deadline")
        .expect("channel open")
}

#[tokio::test]
async fn test_unrecorded_telemetry_is_broadcast_only() {
    let h = harness(1);
    let (_sub, mut rx) = h.app.hub.subscribe_queue(channels::TELEMETRY);

    h.app
        .pipeline
        .ingest("r1", "imu", json!({"ax": 1.0}), None, None)
        .await;

    let envelope = next(&mut rx).await;
    assert_eq!(
        envelope.data,
        json!({"device_id": "r1", "sensor_type": "imu", "payload": {"ax": 1.0}})
    );

    h.app.pipeline.force_flush().await.expect("flush");
    assert!(h.store.telemetry().is_empty());
}

#[tokio::test]
async fn test_session_gates_persistence() {
    let h = harness(100);
    let (_sub, mut rx) = h.app.hub.subscribe_queue(channels::TELEMETRY);

    let session = h
        .app
        .registry
        .start_session("r1", SessionConfig::for_sensors(["imu"]))
        .await
        .expect("start");

    h.app.pipeline.ingest("r1", "imu", json!({"ax": 1.0}), None, None).await;
    h.app.pipeline.ingest("r1", "camera", json!({"frame": 7}), None, None).await;

    assert_eq!(next(&mut rx).await.data["sensor_type"], "imu");
    assert_eq!(next(&mut rx).await.data["sensor_type"], "camera");

    h.app.pipeline.force_flush().await.expect("flush");
    let rows = h.store.telemetry();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sensor_type, "imu");
    assert_eq!(rows[0].session_id, Some(session));

    assert!(h
        .app
        .registry
        .end_session(session, EndMode::Save)
        .await
        .expect("end"));

    h.app.pipeline.ingest("r1", "imu", json!({"ax": 2.0}), None, None).await;
    assert_eq!(next(&mut rx).await.data["payload"]["ax"], 2.0);
    h.app.pipeline.force_flush().await.expect("flush");
    assert_eq!(h.store.telemetry().len(), 1);
}

#[tokio::test]
async fn test_job_progress_streams_in_order() {
    let h = harness(100);
    let (_sub, mut rx) = h.app.hub.subscribe_queue(channels::ML);

    let shutdown = Arc::new(Notify::new());
    let worker = tokio::spawn(h.app.jobs.clone().run_worker(shutdown.clone()));

    let id = h.app.jobs.submit(JobSpec::training("fit", 3)).await;

    let mut progress_steps = Vec::new();
    let final_status = loop {
        let envelope = next(&mut rx).await;
        let data: &Value = &envelope.data;
        assert_eq!(data["job_id"], json!(id));
        match data["type"].as_str() {
            Some("progress") => {
                assert_eq!(data["name"], "loss");
                progress_steps.push(data["step"].as_u64().expect("step"));
            }
            Some("status") if data["status"] == "completed" || data["status"] == "failed" => {
                break data["status"].clone();
            }
            _ => {}
        }
    };

    assert_eq!(progress_steps, vec![1, 2, 3]);
    assert_eq!(final_status, "completed");

    let job = h.app.jobs.job(id).expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.events.len(), 3);
    assert_eq!(h.store.metrics_for(id).len(), 3);

    shutdown.notify_waiters();
    worker.await.expect("worker exits");
}

#[tokio::test]
async fn test_buffer_flushes_exactly_at_capacity() {
    let h = harness(4);
    h.app
        .registry
        .start_session("r1", SessionConfig::default())
        .await
        .expect("start");

    for i in 0..3 {
        h.app.pipeline.ingest("r1", "imu", json!({ "i": i }), None, None).await;
    }
    assert!(h.store.batch_sizes().is_empty());

    h.app.pipeline.ingest("r1", "imu", json!({"i": 3}), None, None).await;
    assert_eq!(h.store.batch_sizes(), vec![4]);
    assert_eq!(h.app.pipeline.buffered(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_yield_one_active_session() {
    let h = harness(10);
    let registry = h.app.registry.clone();

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.start_session("r1", SessionConfig::default()).await })
        })
        .collect();

    let mut started = 0;
    let mut conflicts = 0;
    for attempt in attempts {
        match attempt.await.expect("task") {
            Ok(_) => started += 1,
            Err(SessionError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(registry.list_active().await.len(), 1);
}

#[tokio::test]
async fn test_broker_telemetry_reaches_pipeline() {
    let h = harness(1);
    let (_sub, mut rx) = h.app.hub.subscribe_queue(channels::TELEMETRY);
    let session = h
        .app
        .registry
        .start_session("r7", SessionConfig::default())
        .await
        .expect("start");

    let mut service = BridgeService::new(
        h.app.bridge.clone(),
        h.app.pipeline.clone(),
        &h.app.config.fleet.name,
        true,
    );
    service.initialize().await.expect("initialize");
    let shutdown = Arc::new(Notify::new());
    let handles = service.start(shutdown.clone()).await.expect("start");

    let topic = telemetry_topic(&h.app.config.fleet.name, "r7", "gps");
    assert!(h.transport.inject(&topic, r#"{"lat": 52.37, "lon": 4.89}"#).await);
    assert!(h.transport.inject(&topic, "garbled").await);

    let first = next(&mut rx).await;
    assert_eq!(first.data["lat"], 52.37);
    let second = next(&mut rx).await;
    assert_eq!(second.data["payload"], json!({"raw": "garbled"}));

    h.app.pipeline.force_flush().await.expect("flush");
    let rows = h.store.telemetry();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].latitude, Some(52.37));
    assert_eq!(rows[0].session_id, Some(session));

    shutdown.notify_waiters();
    for handle in handles {
        handle.await.expect("dispatch loop exits");
    }
    service.stop().await.expect("stop");
}

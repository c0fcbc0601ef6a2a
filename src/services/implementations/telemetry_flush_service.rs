use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use crate::telemetry::TelemetryPipeline;

/// Periodic telemetry flush and the final flush on shutdown
pub struct TelemetryFlushService {
    pipeline: Arc<TelemetryPipeline>,
    interval: Option<Duration>,
}

impl TelemetryFlushService {
    pub fn new(pipeline: Arc<TelemetryPipeline>, interval: Option<Duration>) -> Self {
        Self { pipeline, interval }
    }
}

#[async_trait]
impl Service for TelemetryFlushService {
    fn name(&self) -> &'static str {
        "telemetry_flush"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String> {
        let pipeline = self.pipeline.clone();
        let handle = match self.interval {
            Some(interval) => tokio::spawn(pipeline.run_periodic(interval, shutdown)),
            // Capacity and explicit flushes only
            None => tokio::spawn(async move {
                shutdown.notified().await;
            }),
        };
        Ok(vec![handle])
    }

    async fn stop(&mut self) -> Result<(), String> {
        // Upstream services are stopped by now
        match self.pipeline.force_flush().await {
            Ok(_) => Ok(()),
            Err(e) => {
                logger::error(
                    LogTag::Telemetry,
                    &format!(
                        "Shutdown flush failed, {} records not persisted: {}",
                        self.pipeline.buffered(),
                        e
                    ),
                );
                Err(e.to_string())
            }
        }
    }

    async fn health(&self) -> ServiceHealth {
        let stats = self.pipeline.stats();
        if stats.buffered > self.pipeline.capacity() {
            ServiceHealth::Degraded(format!("{} records awaiting retry", stats.buffered))
        } else {
            ServiceHealth::Healthy
        }
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::bridge::topics::telemetry_filter;
use crate::bridge::{MessageBridge, TopicHandler};
use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use crate::telemetry::TelemetryPipeline;

/// Broker session plus the inbound dispatch loop
pub struct BridgeService {
    bridge: Arc<MessageBridge>,
    pipeline: Arc<TelemetryPipeline>,
    fleet: String,
    connect_on_start: bool,
}

impl BridgeService {
    pub fn new(
        bridge: Arc<MessageBridge>,
        pipeline: Arc<TelemetryPipeline>,
        fleet: &str,
        connect_on_start: bool,
    ) -> Self {
        Self {
            bridge,
            pipeline,
            fleet: fleet.to_string(),
            connect_on_start,
        }
    }
}

#[async_trait]
impl Service for BridgeService {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn dependencies(&self) -> Vec<&'static str> {
        // Stops before the final telemetry flush
        vec!["telemetry_flush"]
    }

    async fn initialize(&mut self) -> Result<(), String> {
        let filter = telemetry_filter(&self.fleet);
        self.bridge
            .register_handler(&filter, TopicHandler::Telemetry(self.pipeline.clone()))
            .await
            .map_err(|e| format!("Failed to register telemetry handler: {}", e))
    }

    async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String> {
        if self.connect_on_start {
            if let Err(e) = self.bridge.connect().await {
                // Commands fail with NotConnected until an explicit reconnect
                logger::error(LogTag::Bridge, &format!("Broker connect failed: {}", e));
            }
        }

        let handle = tokio::spawn(self.bridge.clone().run_dispatch(shutdown));
        Ok(vec![handle])
    }

    async fn stop(&mut self) -> Result<(), String> {
        self.bridge.disconnect().await.map_err(|e| e.to_string())
    }

    async fn health(&self) -> ServiceHealth {
        if self.bridge.is_connected() {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Degraded("broker not connected".to_string())
        }
    }
}

/// Shared handles for request handlers
use std::sync::Arc;

use crate::commands::CommandService;
use crate::hub::BroadcastHub;
use crate::jobs::JobQueue;
use crate::telemetry::TelemetryPipeline;

#[derive(Clone)]
pub struct WebState {
    pub hub: Arc<BroadcastHub>,
    pub commands: Option<Arc<CommandService>>,
    pub pipeline: Arc<TelemetryPipeline>,
    pub jobs: Arc<JobQueue>,
}

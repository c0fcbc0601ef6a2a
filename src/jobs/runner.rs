/// Job bodies and their execution context
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::{Job, JobId, JobSpec, ProgressEvent};
use crate::errors::JobError;
use crate::hub::{channels, BroadcastHub};
use crate::storage::JobStore;

pub(crate) type JobTable = Arc<RwLock<HashMap<JobId, Job>>>;

/// A job body
///
/// Implementations call [`JobContext::checkpoint`] between steps so
/// cancellation can take effect, and [`JobContext::report`] for each step.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, spec: &JobSpec, ctx: &JobContext) -> Result<(), JobError>;
}

/// Handle given to a running job
pub struct JobContext {
    job_id: JobId,
    jobs: JobTable,
    hub: Arc<BroadcastHub>,
    store: Arc<dyn JobStore>,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        jobs: JobTable,
        hub: Arc<BroadcastHub>,
        store: Arc<dyn JobStore>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            job_id,
            jobs,
            hub,
            store,
            cancelled,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` once cancellation was requested
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record one progress step: appended to the job, broadcast on "ml" and
    /// persisted as a metric
    pub async fn report(&self, step: u32, name: &str, value: f64) -> Result<(), JobError> {
        let event = ProgressEvent {
            step,
            name: name.to_string(),
            value,
            timestamp: Utc::now(),
        };

        if let Some(job) = self.jobs.write().get_mut(&self.job_id) {
            job.events.push(event.clone());
        }

        self.hub
            .broadcast(
                channels::ML,
                json!({
                    "type": "progress",
                    "job_id": self.job_id,
                    "step": event.step,
                    "name": event.name,
                    "value": event.value,
                    "timestamp": event.timestamp,
                }),
            )
            .await;

        self.store.insert_metric(self.job_id, &event).await?;
        Ok(())
    }
}

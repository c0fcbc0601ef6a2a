use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::jobs::JobQueue;
use crate::services::Service;

/// The single job worker
pub struct JobWorkerService {
    queue: Arc<JobQueue>,
}

impl JobWorkerService {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Service for JobWorkerService {
    fn name(&self) -> &'static str {
        "job_worker"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn start(&mut self, shutdown: Arc<Notify>) -> Result<Vec<JoinHandle<()>>, String> {
        Ok(vec![tokio::spawn(self.queue.clone().run_worker(shutdown))])
    }
}

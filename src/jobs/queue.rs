/// Job queue - FIFO submission and the single worker
///
/// Jobs never overlap: the worker awaits each job body to completion before
/// dequeuing the next. A body that errors or panics fails its own job only.
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use super::runner::{JobContext, JobRunner, JobTable};
use super::types::{Job, JobId, JobSpec, JobStatus};
use crate::config::JobsConfig;
use crate::errors::JobError;
use crate::hub::{channels, BroadcastHub};
use crate::logger::{self, LogTag};
use crate::storage::JobStore;

pub struct JobQueue {
    jobs: JobTable,

    /// Submission order
    order: RwLock<Vec<JobId>>,

    /// Finished jobs still held in memory, oldest first
    finished: Mutex<VecDeque<JobId>>,
    retained_finished: usize,

    cancel_flags: RwLock<HashMap<JobId, Arc<AtomicBool>>>,
    runners: RwLock<HashMap<String, Arc<dyn JobRunner>>>,

    sender: mpsc::UnboundedSender<JobId>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<JobId>>>,
    pending: AtomicUsize,

    hub: Arc<BroadcastHub>,
    store: Arc<dyn JobStore>,
    depth_warning: usize,
}

impl JobQueue {
    pub fn new(hub: Arc<BroadcastHub>, store: Arc<dyn JobStore>, config: &JobsConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            order: RwLock::new(Vec::new()),
            finished: Mutex::new(VecDeque::new()),
            retained_finished: config.retained_finished,
            cancel_flags: RwLock::new(HashMap::new()),
            runners: RwLock::new(HashMap::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            pending: AtomicUsize::new(0),
            hub,
            store,
            depth_warning: config.queue_depth_warning,
        })
    }

    /// Register the body for a runner key, replacing any earlier one
    pub fn register_runner(&self, key: &str, runner: Arc<dyn JobRunner>) {
        self.runners.write().insert(key.to_string(), runner);
    }

    /// Enqueue at the tail; returns without waiting for execution
    pub async fn submit(&self, spec: JobSpec) -> JobId {
        let job = Job::new(spec);
        let id = job.id;

        self.jobs.write().insert(id, job.clone());
        self.order.write().push(id);
        self.cancel_flags
            .write()
            .insert(id, Arc::new(AtomicBool::new(false)));

        let depth = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if self.sender.send(id).is_err() {
            logger::error(LogTag::Jobs, &format!("Job queue closed, {} not scheduled", id));
        }

        logger::info(
            LogTag::Jobs,
            &format!("Job {} '{}' queued ({} waiting)", id, job.spec.name, depth),
        );
        if depth > self.depth_warning {
            logger::warning(
                LogTag::Jobs,
                &format!("{} jobs waiting in queue", depth),
            );
        }

        self.publish_status(&job).await;
        id
    }

    /// Request cancellation
    ///
    /// A queued job fails with "cancelled" right away and never runs; a running
    /// job fails at its next checkpoint. Returns false for unknown or finished
    /// jobs.
    pub async fn cancel(&self, id: JobId) -> bool {
        let reason = Some(JobError::Cancelled.to_string());
        match self.transition_from(id, JobStatus::Queued, JobStatus::Failed, reason) {
            Ok(job) => {
                logger::info(LogTag::Jobs, &format!("Job {} cancelled before start", id));
                self.publish_status(&job).await;
                self.retire(id);
                true
            }
            // The worker may have picked it up in the meantime
            Err(Some(JobStatus::Running)) => {
                if let Some(flag) = self.cancel_flags.read().get(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
                logger::info(LogTag::Jobs, &format!("Cancellation requested for running job {}", id));
                true
            }
            Err(_) => false,
        }
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Every job still held in memory, in submission order
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read();
        self.order
            .read()
            .iter()
            .filter_map(|id| jobs.get(id).cloned())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Apply a monotonic status change; None when the transition is not allowed
    fn transition(&self, id: JobId, next: JobStatus, error: Option<String>) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id)?;
        Self::apply(job, next, error)
    }

    /// Compare-and-set: apply `next` only while the job is still in `expected`
    ///
    /// On mismatch returns the status actually found (None for unknown jobs).
    fn transition_from(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<Job, Option<JobStatus>> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(None)?;
        if job.status != expected {
            return Err(Some(job.status));
        }
        Self::apply(job, next, error).ok_or(Some(expected))
    }

    fn apply(job: &mut Job, next: JobStatus, error: Option<String>) -> Option<Job> {
        if !job.status.can_transition_to(next) {
            return None;
        }

        job.status = next;
        match next {
            JobStatus::Running => job.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed => {
                job.finished_at = Some(Utc::now());
                job.error = error;
            }
            JobStatus::Queued => {}
        }
        Some(job.clone())
    }

    /// Record a finished job; the oldest finished jobs beyond the retention
    /// limit are dropped from memory (storage keeps them)
    fn retire(&self, id: JobId) {
        let expired: Vec<JobId> = {
            let mut finished = self.finished.lock();
            finished.push_back(id);
            let excess = finished.len().saturating_sub(self.retained_finished);
            finished.drain(..excess).collect()
        };
        if expired.is_empty() {
            return;
        }

        {
            let mut jobs = self.jobs.write();
            for old in &expired {
                jobs.remove(old);
            }
        }
        self.order.write().retain(|job_id| !expired.contains(job_id));
        logger::debug(
            LogTag::Jobs,
            &format!("Released {} finished jobs from memory", expired.len()),
        );
    }

    /// Persist and broadcast the job's current status
    async fn publish_status(&self, job: &Job) {
        if let Err(e) = self.store.save_job(job).await {
            logger::error(
                LogTag::Jobs,
                &format!("Failed to persist job {} ({}): {}", job.id, job.status, e),
            );
        }

        self.hub
            .broadcast(
                channels::ML,
                json!({
                    "type": "status",
                    "job_id": job.id,
                    "name": job.spec.name,
                    "status": job.status,
                    "error": job.error,
                }),
            )
            .await;
    }

    /// Run one dequeued job to a terminal state
    async fn execute(&self, id: JobId) {
        self.pending.fetch_sub(1, Ordering::SeqCst);

        let spec = match self.jobs.read().get(&id) {
            Some(job) if job.status == JobStatus::Queued => job.spec.clone(),
            _ => {
                self.cancel_flags.write().remove(&id);
                return;
            }
        };

        let runner = self.runners.read().get(spec.kind.runner_key()).cloned();
        let runner = match runner {
            Some(runner) => runner,
            None => {
                let reason = format!("no runner registered for '{}'", spec.kind.runner_key());
                logger::error(LogTag::Jobs, &format!("Job {} failed: {}", id, reason));
                if let Some(job) = self.transition(id, JobStatus::Failed, Some(reason)) {
                    self.publish_status(&job).await;
                    self.retire(id);
                }
                self.cancel_flags.write().remove(&id);
                return;
            }
        };

        let job = match self.transition(id, JobStatus::Running, None) {
            Some(job) => job,
            None => return,
        };
        logger::info(LogTag::Jobs, &format!("Job {} '{}' running", id, spec.name));
        self.publish_status(&job).await;

        let cancelled = self
            .cancel_flags
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_default();
        let ctx = JobContext::new(id, self.jobs.clone(), self.hub.clone(), self.store.clone(), cancelled);

        // Spawned so a panicking body fails only its own job
        let body = tokio::spawn(async move { runner.run(&spec, &ctx).await });
        let outcome = match body.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) => Err(format!("job body panicked: {}", join_error)),
        };

        let finished = match outcome {
            Ok(()) => {
                logger::info(LogTag::Jobs, &format!("Job {} completed", id));
                self.transition(id, JobStatus::Completed, None)
            }
            Err(reason) => {
                logger::warning(LogTag::Jobs, &format!("Job {} failed: {}", id, reason));
                self.transition(id, JobStatus::Failed, Some(reason))
            }
        };
        if let Some(job) = finished {
            self.publish_status(&job).await;
            self.retire(id);
        }

        self.cancel_flags.write().remove(&id);
    }

    /// Worker loop; runs until shutdown
    pub async fn run_worker(self: Arc<Self>, shutdown: Arc<Notify>) {
        let receiver = self.receiver.lock().take();
        let mut receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                logger::error(LogTag::Jobs, "Job worker already running");
                return;
            }
        };

        logger::info(LogTag::Jobs, "Job worker started");
        let notified = shutdown.notified();
        tokio::pin!(notified);

        loop {
            tokio::select! {
                _ = &mut notified => break,
                next = receiver.recv() => match next {
                    Some(id) => self.execute(id).await,
                    None => break,
                },
            }
        }

        *self.receiver.lock() = Some(receiver);
        logger::info(LogTag::Jobs, "Job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobKind, TrainingRunner};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Body that records start/end markers and optionally fails
    struct RecordingRunner {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, spec: &JobSpec, ctx: &JobContext) -> Result<(), JobError> {
            self.log.lock().push(format!("start:{}", spec.name));
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.report(1, "tick", 1.0).await?;
            self.log.lock().push(format!("end:{}", spec.name));
            if spec.name == "bad" {
                return Err(JobError::Execution("boom".to_string()));
            }
            Ok(())
        }
    }

    struct PanickingRunner;

    #[async_trait]
    impl JobRunner for PanickingRunner {
        async fn run(&self, _spec: &JobSpec, _ctx: &JobContext) -> Result<(), JobError> {
            panic!("runner exploded");
        }
    }

    fn custom(name: &str, runner: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            kind: JobKind::Custom {
                runner: runner.to_string(),
                params: json!({}),
            },
        }
    }

    fn queue(store: &Arc<MemoryStore>) -> (Arc<JobQueue>, Arc<BroadcastHub>) {
        let hub = BroadcastHub::with_settings(Duration::from_millis(100), 256);
        let queue = JobQueue::new(hub.clone(), store.clone(), &JobsConfig::default());
        (queue, hub)
    }

    async fn wait_terminal(queue: &JobQueue, id: JobId) -> Job {
        for _ in 0..500 {
            if let Some(job) = queue.job(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_jobs_run_in_order_without_overlap() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _hub) = queue(&store);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.register_runner("record", Arc::new(RecordingRunner { log: log.clone() }));

        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(queue.clone().run_worker(shutdown.clone()));

        let ids = vec![
            queue.submit(custom("j1", "record")).await,
            queue.submit(custom("j2", "record")).await,
            queue.submit(custom("j3", "record")).await,
        ];
        for id in &ids {
            wait_terminal(&queue, *id).await;
        }

        assert_eq!(
            *log.lock(),
            vec!["start:j1", "end:j1", "start:j2", "end:j2", "start:j3", "end:j3"]
        );
        let names: Vec<String> = queue.list().into_iter().map(|j| j.spec.name).collect();
        assert_eq!(names, vec!["j1", "j2", "j3"]);

        shutdown.notify_waiters();
        worker.await.expect("worker exits");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _hub) = queue(&store);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.register_runner("record", Arc::new(RecordingRunner { log }));
        queue.register_runner("panic", Arc::new(PanickingRunner));

        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(queue.clone().run_worker(shutdown.clone()));

        let bad = queue.submit(custom("bad", "record")).await;
        let exploding = queue.submit(custom("explode", "panic")).await;
        let missing = queue.submit(custom("orphan", "nobody")).await;
        let good = queue.submit(custom("good", "record")).await;

        let bad = wait_terminal(&queue, bad).await;
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("Job execution failed: boom"));

        let exploding = wait_terminal(&queue, exploding).await;
        assert_eq!(exploding.status, JobStatus::Failed);
        assert!(exploding.error.unwrap_or_default().contains("panicked"));

        let missing = wait_terminal(&queue, missing).await;
        assert_eq!(missing.status, JobStatus::Failed);

        let good = wait_terminal(&queue, good).await;
        assert_eq!(good.status, JobStatus::Completed);
        assert_eq!(store.job(good.id).expect("persisted").status, JobStatus::Completed);
        assert_eq!(store.metrics_for(good.id).len(), 1);

        shutdown.notify_waiters();
        worker.await.expect("worker exits");
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _hub) = queue(&store);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.register_runner("record", Arc::new(RecordingRunner { log: log.clone() }));

        let id = queue.submit(custom("skipped", "record")).await;
        assert!(queue.cancel(id).await);
        assert!(!queue.cancel(id).await);

        let job = queue.job(id).expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));

        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(queue.clone().run_worker(shutdown.clone()));
        let after = queue.submit(custom("after", "record")).await;
        wait_terminal(&queue, after).await;

        assert!(!log.lock().iter().any(|entry| entry.ends_with("skipped")));
        assert_eq!(queue.job(id).expect("job").status, JobStatus::Failed);

        shutdown.notify_waiters();
        worker.await.expect("worker exits");
    }

    #[tokio::test]
    async fn test_cancel_after_worker_start_only_flags_job() {
        let store = Arc::new(MemoryStore::new());
        let (queue, hub) = queue(&store);
        let (_observer, mut ml_rx) = hub.subscribe_queue(channels::ML);

        let id = queue.submit(custom("racing", "record")).await;
        assert_eq!(ml_rx.recv().await.expect("queued status").data["status"], "queued");

        // Worker claims the job between the caller's request and the cancel
        assert!(queue.transition(id, JobStatus::Running, None).is_some());
        assert!(queue.cancel(id).await);

        let job = queue.job(id).expect("job");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.error, None);
        assert!(queue.cancel_flags.read()[&id].load(Ordering::SeqCst));
        assert!(ml_rx.try_recv().is_err());
    }

    #[test]
    fn test_transition_from_reports_actual_status() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _hub) = queue(&store);
        let job = Job::new(custom("cas", "record"));
        let id = job.id;
        queue.jobs.write().insert(id, job);

        assert!(queue
            .transition_from(id, JobStatus::Queued, JobStatus::Running, None)
            .is_ok());
        assert_eq!(
            queue
                .transition_from(id, JobStatus::Queued, JobStatus::Failed, None)
                .map(|j| j.status),
            Err(Some(JobStatus::Running))
        );
        assert_eq!(
            queue
                .transition_from(JobId::new_v4(), JobStatus::Queued, JobStatus::Failed, None)
                .map(|j| j.status),
            Err(None)
        );
    }

    #[tokio::test]
    async fn test_finished_jobs_beyond_retention_are_released() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::with_settings(Duration::from_millis(100), 256);
        let config = JobsConfig {
            retained_finished: 2,
            ..JobsConfig::default()
        };
        let queue = JobQueue::new(hub, store.clone(), &config);

        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let id = queue.submit(custom(name, "record")).await;
            assert!(queue.cancel(id).await);
            ids.push(id);
        }
        let waiting = queue.submit(custom("d", "record")).await;

        assert!(queue.job(ids[0]).is_none());
        assert_eq!(store.job(ids[0]).expect("still persisted").status, JobStatus::Failed);
        let names: Vec<String> = queue.list().into_iter().map(|j| j.spec.name).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
        assert_eq!(queue.job(waiting).expect("queued job").status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_running_job_stops_at_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _hub) = queue(&store);
        queue.register_runner("training", Arc::new(TrainingRunner::new(Duration::from_millis(50))));

        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(queue.clone().run_worker(shutdown.clone()));

        let id = queue.submit(JobSpec::training("long", 100)).await;
        for _ in 0..100 {
            if queue.job(id).map(|j| j.status) == Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(queue.cancel(id).await);

        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert!(job.events.len() < 100);

        shutdown.notify_waiters();
        worker.await.expect("worker exits");
    }
}

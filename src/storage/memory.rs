/// In-memory storage adapter
///
/// Used when no database path is configured and throughout the tests. Insert
/// failures can be injected to exercise flush retry paths.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{CommandAudit, JobStore, SessionStore, TelemetryStore};
use crate::commands::CommandMessage;
use crate::errors::{PersistenceError, PersistenceResult};
use crate::jobs::{Job, JobId, ProgressEvent};
use crate::sessions::{RecordingSession, SessionId};
use crate::telemetry::TelemetryRecord;

#[derive(Default)]
pub struct MemoryStore {
    telemetry: Mutex<Vec<TelemetryRecord>>,
    sessions: Mutex<HashMap<SessionId, RecordingSession>>,
    jobs: Mutex<HashMap<JobId, Job>>,
    metrics: Mutex<Vec<(JobId, ProgressEvent)>>,
    commands: Mutex<Vec<(CommandMessage, String)>>,
    batch_sizes: Mutex<Vec<usize>>,
    fail_inserts: AtomicBool,
    failed_inserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following batch insert fail until switched back
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn failed_inserts(&self) -> usize {
        self.failed_inserts.load(Ordering::SeqCst)
    }

    pub fn telemetry(&self) -> Vec<TelemetryRecord> {
        self.telemetry.lock().clone()
    }

    /// Size of every successful batch insert, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn session(&self, id: SessionId) -> Option<RecordingSession> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }

    pub fn metrics_for(&self, id: JobId) -> Vec<ProgressEvent> {
        self.metrics
            .lock()
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn commands(&self) -> Vec<(CommandMessage, String)> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_batch(&self, records: &[TelemetryRecord]) -> PersistenceResult<usize> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            self.failed_inserts.fetch_add(1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable("injected insert failure".to_string()));
        }
        self.telemetry.lock().extend_from_slice(records);
        self.batch_sizes.lock().push(records.len());
        Ok(records.len())
    }

    async fn delete_for_session(&self, session_id: SessionId) -> PersistenceResult<usize> {
        let mut rows = self.telemetry.lock();
        let before = rows.len();
        rows.retain(|r| r.session_id != Some(session_id));
        Ok(before - rows.len())
    }

    async fn records_for_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> PersistenceResult<Vec<TelemetryRecord>> {
        Ok(self
            .telemetry
            .lock()
            .iter()
            .rev()
            .filter(|r| r.session_id == Some(session_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &RecordingSession) -> PersistenceResult<()> {
        self.sessions.lock().insert(session.id, session.clone());
        Ok(())
    }

    async fn mark_stopped(
        &self,
        session_id: SessionId,
        stopped_at: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        if let Some(session) = self.sessions.lock().get_mut(&session_id) {
            if session.is_active {
                session.is_active = false;
                session.stopped_at = Some(stopped_at);
            }
        }
        Ok(())
    }

    async fn load_active(&self) -> PersistenceResult<Vec<RecordingSession>> {
        let mut active: Vec<RecordingSession> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.started_at);
        Ok(active)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> PersistenceResult<()> {
        self.jobs.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn insert_metric(&self, job_id: JobId, event: &ProgressEvent) -> PersistenceResult<()> {
        self.metrics.lock().push((job_id, event.clone()));
        Ok(())
    }
}

#[async_trait]
impl CommandAudit for MemoryStore {
    async fn record_command(&self, command: &CommandMessage, topic: &str) -> PersistenceResult<()> {
        self.commands.lock().push((command.clone(), topic.to_string()));
        Ok(())
    }
}

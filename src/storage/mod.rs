//! Persistence adapters
//!
//! Components depend on the narrow traits below, never on a concrete store.
//! [`SqliteStore`] backs production; [`MemoryStore`] backs tests and
//! database-less runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::commands::CommandMessage;
use crate::errors::PersistenceResult;
use crate::jobs::{Job, JobId, ProgressEvent};
use crate::sessions::{RecordingSession, SessionId};
use crate::telemetry::TelemetryRecord;

/// Durable telemetry rows
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert all records in one transaction (all-or-nothing)
    async fn insert_batch(&self, records: &[TelemetryRecord]) -> PersistenceResult<usize>;

    /// Remove every record stamped with the session
    async fn delete_for_session(&self, session_id: SessionId) -> PersistenceResult<usize>;

    /// Most recent records of a session, newest first
    async fn records_for_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> PersistenceResult<Vec<TelemetryRecord>>;
}

/// Recording session rows
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &RecordingSession) -> PersistenceResult<()>;

    async fn mark_stopped(
        &self,
        session_id: SessionId,
        stopped_at: DateTime<Utc>,
    ) -> PersistenceResult<()>;

    async fn load_active(&self) -> PersistenceResult<Vec<RecordingSession>>;
}

/// Job state and per-step metrics
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert the job row (status, error, timestamps)
    async fn save_job(&self, job: &Job) -> PersistenceResult<()>;

    async fn insert_metric(&self, job_id: JobId, event: &ProgressEvent) -> PersistenceResult<()>;
}

/// Command-issued audit trail
#[async_trait]
pub trait CommandAudit: Send + Sync {
    async fn record_command(&self, command: &CommandMessage, topic: &str) -> PersistenceResult<()>;
}

/// SQLite storage adapter
///
/// Split read/write pools over one database file, WAL journal, schema created
/// on open. Batch inserts run in a single transaction.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use super::{CommandAudit, JobStore, SessionStore, TelemetryStore};
use crate::commands::CommandMessage;
use crate::config::DatabaseConfig;
use crate::errors::{PersistenceError, PersistenceResult};
use crate::jobs::{Job, JobId, ProgressEvent};
use crate::logger::{self, LogTag};
use crate::sessions::{RecordingSession, SessionConfig, SessionId};
use crate::telemetry::TelemetryRecord;

// =============================================================================
// SCHEMA
// =============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS recording_sessions (
        id          TEXT    PRIMARY KEY,
        device_id   TEXT    NOT NULL,
        is_active   INTEGER NOT NULL,
        started_at  TEXT    NOT NULL,
        stopped_at  TEXT,
        config_json TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_device_active
        ON recording_sessions(device_id, is_active)",
    "CREATE TABLE IF NOT EXISTS telemetry (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id    TEXT    NOT NULL,
        sensor_type  TEXT    NOT NULL,
        session_id   TEXT,
        payload_json TEXT    NOT NULL,
        recorded_at  TEXT    NOT NULL,
        latitude     REAL,
        longitude    REAL
    )",
    "CREATE INDEX IF NOT EXISTS idx_telemetry_session
        ON telemetry(session_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_telemetry_device_time
        ON telemetry(device_id, recorded_at DESC)",
    "CREATE TABLE IF NOT EXISTS jobs (
        id           TEXT PRIMARY KEY,
        name         TEXT NOT NULL,
        kind_json    TEXT NOT NULL,
        status       TEXT NOT NULL,
        error        TEXT,
        submitted_at TEXT NOT NULL,
        started_at   TEXT,
        finished_at  TEXT
    )",
    "CREATE TABLE IF NOT EXISTS job_metrics (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id      TEXT    NOT NULL,
        step        INTEGER NOT NULL,
        name        TEXT    NOT NULL,
        value       REAL    NOT NULL,
        recorded_at TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_metrics_job
        ON job_metrics(job_id, step)",
    "CREATE TABLE IF NOT EXISTS command_audit (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id       TEXT NOT NULL,
        kind            TEXT NOT NULL,
        topic           TEXT NOT NULL,
        parameters_json TEXT NOT NULL,
        issued_at       TEXT NOT NULL
    )",
];

// =============================================================================
// DATABASE STRUCTURE
// =============================================================================

type Connection = PooledConnection<SqliteConnectionManager>;

pub struct SqliteStore {
    write_pool: Pool<SqliteConnectionManager>,
    read_pool: Pool<SqliteConnectionManager>,
    connection_timeout: Duration,
    database_path: String,
}

impl SqliteStore {
    /// Open (or create) the database file and initialize the schema
    pub fn open(config: &DatabaseConfig) -> PersistenceResult<Self> {
        let database_path = Path::new(&config.path);
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection_timeout = Duration::from_millis(config.connection_timeout_ms);

        let write_pool = Pool::builder()
            .max_size(config.write_pool_size)
            .connection_timeout(connection_timeout)
            .build(SqliteConnectionManager::file(database_path))?;

        let read_pool = Pool::builder()
            .max_size(config.read_pool_size)
            .connection_timeout(connection_timeout)
            .build(SqliteConnectionManager::file(database_path))?;

        let store = Self {
            write_pool,
            read_pool,
            connection_timeout,
            database_path: config.path.clone(),
        };

        store.initialize_schema()?;

        logger::info(
            LogTag::Storage,
            &format!("Database initialized at {}", store.database_path),
        );

        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.database_path
    }

    fn initialize_schema(&self) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        for statement in SCHEMA {
            conn.execute(statement, [])?;
        }
        Ok(())
    }

    fn get_write_connection(&self) -> PersistenceResult<Connection> {
        let conn = self.write_pool.get()?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "memory")?;
        conn.busy_timeout(self.connection_timeout)?;
        Ok(conn)
    }

    fn get_read_connection(&self) -> PersistenceResult<Connection> {
        let conn = self.read_pool.get()?;
        conn.pragma_update(None, "query_only", "1")?;
        conn.busy_timeout(self.connection_timeout)?;
        Ok(conn)
    }
}

fn parse_time(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_uuid(index: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e)))
}

// =============================================================================
// TELEMETRY
// =============================================================================

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn insert_batch(&self, records: &[TelemetryRecord]) -> PersistenceResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.get_write_connection()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry (
                    device_id, sensor_type, session_id, payload_json,
                    recorded_at, latitude, longitude
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for record in records {
                let payload = serde_json::to_string(&record.payload)?;
                stmt.execute(params![
                    record.device_id,
                    record.sensor_type,
                    record.session_id.map(|id| id.to_string()),
                    payload,
                    record.timestamp.to_rfc3339(),
                    record.latitude,
                    record.longitude,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    async fn delete_for_session(&self, session_id: SessionId) -> PersistenceResult<usize> {
        let conn = self.get_write_connection()?;
        let deleted = conn.execute(
            "DELETE FROM telemetry WHERE session_id = ?1",
            params![session_id.to_string()],
        )?;
        Ok(deleted)
    }

    async fn records_for_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> PersistenceResult<Vec<TelemetryRecord>> {
        let conn = self.get_read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT device_id, sensor_type, session_id, payload_json, recorded_at, latitude, longitude
             FROM telemetry WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![session_id.to_string(), limit as i64], |row| {
            let session: Option<String> = row.get(2)?;
            Ok(TelemetryRecord {
                device_id: row.get(0)?,
                sensor_type: row.get(1)?,
                session_id: session.as_deref().map(|s| parse_uuid(2, s)).transpose()?,
                payload: parse_json(3, &row.get::<_, String>(3)?)?,
                timestamp: parse_time(4, &row.get::<_, String>(4)?)?,
                latitude: row.get(5)?,
                longitude: row.get(6)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &RecordingSession) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        let config = serde_json::to_string(&session.config)?;
        conn.execute(
            "INSERT INTO recording_sessions (id, device_id, is_active, started_at, stopped_at, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id.to_string(),
                session.device_id,
                session.is_active,
                session.started_at.to_rfc3339(),
                session.stopped_at.map(|t| t.to_rfc3339()),
                config,
            ],
        )?;
        Ok(())
    }

    async fn mark_stopped(
        &self,
        session_id: SessionId,
        stopped_at: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        conn.execute(
            "UPDATE recording_sessions SET is_active = 0, stopped_at = ?2
             WHERE id = ?1 AND is_active = 1",
            params![session_id.to_string(), stopped_at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_active(&self) -> PersistenceResult<Vec<RecordingSession>> {
        let conn = self.get_read_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, device_id, started_at, config_json
             FROM recording_sessions WHERE is_active = 1 ORDER BY started_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(RecordingSession {
                id: parse_uuid(0, &row.get::<_, String>(0)?)?,
                device_id: row.get(1)?,
                is_active: true,
                started_at: parse_time(2, &row.get::<_, String>(2)?)?,
                stopped_at: None,
                config: parse_json::<SessionConfig>(3, &row.get::<_, String>(3)?)?,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}

// =============================================================================
// JOBS
// =============================================================================

#[async_trait]
impl JobStore for SqliteStore {
    async fn save_job(&self, job: &Job) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        let kind = serde_json::to_string(&job.spec.kind)?;
        conn.execute(
            "INSERT INTO jobs (id, name, kind_json, status, error, submitted_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at",
            params![
                job.id.to_string(),
                job.spec.name,
                kind,
                job.status.as_str(),
                job.error,
                job.submitted_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn insert_metric(&self, job_id: JobId, event: &ProgressEvent) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        conn.execute(
            "INSERT INTO job_metrics (job_id, step, name, value, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id.to_string(),
                event.step,
                event.name,
                event.value,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

// =============================================================================
// COMMAND AUDIT
// =============================================================================

#[async_trait]
impl CommandAudit for SqliteStore {
    async fn record_command(&self, command: &CommandMessage, topic: &str) -> PersistenceResult<()> {
        let conn = self.get_write_connection()?;
        let parameters = serde_json::to_string(&command.payload())?;
        conn.execute(
            "INSERT INTO command_audit (device_id, kind, topic, parameters_json, issued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                command.device_id,
                command.kind.name(),
                topic,
                parameters,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl SqliteStore {
    /// Row count of a table (diagnostics and tests)
    pub fn count_rows(&self, table: &str) -> PersistenceResult<i64> {
        const TABLES: &[&str] = &["recording_sessions", "telemetry", "jobs", "job_metrics", "command_audit"];
        if !TABLES.contains(&table) {
            return Err(PersistenceError::Unavailable(format!("unknown table {}", table)));
        }
        let conn = self.get_read_connection()?;
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }
}

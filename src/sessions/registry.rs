/// Session registry - per-device recording state
///
/// Each device has its own slot behind its own async lock; calls for one
/// device are observed in the order they acquire it, and devices never
/// contend with each other. Session rows are written through before the
/// in-memory state changes, so a failed write leaves the state untouched.
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{EndMode, RecordingSession, SessionConfig, SessionId};
use crate::config::SessionsConfig;
use crate::errors::SessionError;
use crate::logger::{self, LogTag};
use crate::storage::{SessionStore, TelemetryStore};

#[derive(Default)]
struct DeviceSlot {
    active: Option<RecordingSession>,

    /// Last accepted timestamp per sensor, for rate limiting
    last_accepted: HashMap<String, DateTime<Utc>>,
}

/// Persistence decision for one telemetry sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Persist, stamped with this session
    Accepted(SessionId),
    NoActiveSession,
    SensorNotAllowed,
    RateLimited,
}

impl Admission {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Admission::Accepted(id) => Some(*id),
            _ => None,
        }
    }
}

pub struct SessionRegistry {
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceSlot>>>>,

    /// Active session id → owning device
    index: RwLock<HashMap<SessionId, String>>,

    /// Most recently ended sessions, oldest first
    ended: RwLock<VecDeque<RecordingSession>>,
    ended_history: usize,

    store: Arc<dyn SessionStore>,
    telemetry_store: Arc<dyn TelemetryStore>,
    discard_purges_records: bool,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        telemetry_store: Arc<dyn TelemetryStore>,
        config: &SessionsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            devices: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            ended: RwLock::new(VecDeque::new()),
            ended_history: config.ended_history,
            store,
            telemetry_store,
            discard_purges_records: config.discard_purges_records,
        })
    }

    fn slot(&self, device_id: &str) -> Arc<Mutex<DeviceSlot>> {
        if let Some(slot) = self.devices.read().get(device_id) {
            return slot.clone();
        }
        self.devices
            .write()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, device_id: &str) -> Option<Arc<Mutex<DeviceSlot>>> {
        self.devices.read().get(device_id).cloned()
    }

    /// Start recording for a device
    ///
    /// Fails with `Conflict` when the device already has an active session.
    pub async fn start_session(
        &self,
        device_id: &str,
        config: SessionConfig,
    ) -> Result<SessionId, SessionError> {
        let slot = self.slot(device_id);
        let mut slot = slot.lock().await;

        if let Some(active) = &slot.active {
            return Err(SessionError::Conflict {
                device_id: device_id.to_string(),
                active: active.id,
            });
        }

        let session = RecordingSession::new(device_id, config);
        self.store.insert_session(&session).await?;

        let id = session.id;
        logger::info(
            LogTag::Sessions,
            &format!(
                "Session {} started for {} (sensors: {})",
                id,
                device_id,
                if session.config.sensor_types.is_empty() {
                    "all".to_string()
                } else {
                    session.config.sensor_types.join(",")
                }
            ),
        );

        slot.last_accepted.clear();
        slot.active = Some(session);
        self.index.write().insert(id, device_id.to_string());
        Ok(id)
    }

    /// End a session
    ///
    /// Ending an unknown or already-ended session is a no-op and returns
    /// `Ok(false)`.
    pub async fn end_session(&self, session_id: SessionId, mode: EndMode) -> Result<bool, SessionError> {
        let device_id = match self.index.read().get(&session_id) {
            Some(device_id) => device_id.clone(),
            None => return Ok(false),
        };
        let slot = match self.existing_slot(&device_id) {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let mut slot = slot.lock().await;

        if slot.active.as_ref().map(|s| s.id) != Some(session_id) {
            return Ok(false);
        }

        let stopped_at = Utc::now();
        self.store.mark_stopped(session_id, stopped_at).await?;

        if let Some(mut session) = slot.active.take() {
            session.is_active = false;
            session.stopped_at = Some(stopped_at);
            self.remember_ended(session);
        }
        slot.last_accepted.clear();
        self.index.write().remove(&session_id);
        drop(slot);

        logger::info(
            LogTag::Sessions,
            &format!("Session {} ended for {} ({:?})", session_id, device_id, mode),
        );

        if mode == EndMode::Discard && self.discard_purges_records {
            match self.telemetry_store.delete_for_session(session_id).await {
                Ok(purged) => logger::info(
                    LogTag::Sessions,
                    &format!("Discarded session {}: purged {} records", session_id, purged),
                ),
                Err(e) => logger::error(
                    LogTag::Sessions,
                    &format!("Failed to purge records of session {}: {}", session_id, e),
                ),
            }
        }

        Ok(true)
    }

    /// Active session id for a device
    pub async fn active_session_for(&self, device_id: &str) -> Option<SessionId> {
        let slot = self.existing_slot(device_id)?;
        let slot = slot.lock().await;
        slot.active.as_ref().map(|s| s.id)
    }

    /// Whether a session records a sensor at all (ignores rate limits)
    pub fn is_sensor_allowed(session: &RecordingSession, sensor_type: &str) -> bool {
        session.config.allows(sensor_type)
    }

    /// Decide whether a sample taken at `at` is persisted
    ///
    /// Lookup, allow-list and rate limit are checked under the device lock, so
    /// an accepted sample always references a session active at that instant.
    pub async fn admit(&self, device_id: &str, sensor_type: &str, at: DateTime<Utc>) -> Admission {
        let slot = match self.existing_slot(device_id) {
            Some(slot) => slot,
            None => return Admission::NoActiveSession,
        };
        let mut slot = slot.lock().await;

        let (session_id, min_interval) = match &slot.active {
            Some(session) if Self::is_sensor_allowed(session, sensor_type) => {
                (session.id, session.config.min_interval_ms(sensor_type))
            }
            Some(_) => return Admission::SensorNotAllowed,
            None => return Admission::NoActiveSession,
        };

        if let (Some(interval), Some(last)) = (min_interval, slot.last_accepted.get(sensor_type)) {
            if (at - *last).num_milliseconds() < interval {
                return Admission::RateLimited;
            }
        }

        slot.last_accepted.insert(sensor_type.to_string(), at);
        Admission::Accepted(session_id)
    }

    /// Reload sessions still marked active in storage
    ///
    /// When storage holds several active sessions for one device the newest
    /// wins and the others are marked stopped.
    pub async fn restore(&self) -> Result<usize, SessionError> {
        let sessions = self.store.load_active().await?;
        let mut restored = HashSet::new();

        for session in sessions {
            let slot = self.slot(&session.device_id);
            let mut slot = slot.lock().await;

            if let Some(previous) = slot.active.take() {
                logger::warning(
                    LogTag::Sessions,
                    &format!(
                        "Device {} had several active sessions, stopping {}",
                        previous.device_id, previous.id
                    ),
                );
                self.store.mark_stopped(previous.id, Utc::now()).await?;
                self.index.write().remove(&previous.id);
            }

            self.index.write().insert(session.id, session.device_id.clone());
            restored.insert(session.device_id.clone());
            slot.active = Some(session);
        }

        if !restored.is_empty() {
            logger::info(
                LogTag::Sessions,
                &format!("Restored {} active sessions", restored.len()),
            );
        }
        Ok(restored.len())
    }

    /// Snapshot of every active session
    pub async fn list_active(&self) -> Vec<RecordingSession> {
        let slots: Vec<Arc<Mutex<DeviceSlot>>> = self.devices.read().values().cloned().collect();
        let mut sessions = Vec::new();
        for slot in slots {
            if let Some(session) = &slot.lock().await.active {
                sessions.push(session.clone());
            }
        }
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Look up a session that is active or among the recently ended ones
    pub async fn session(&self, session_id: SessionId) -> Option<RecordingSession> {
        let device_id = self.index.read().get(&session_id).cloned();
        if let Some(device_id) = device_id {
            if let Some(slot) = self.existing_slot(&device_id) {
                let slot = slot.lock().await;
                if let Some(session) = slot.active.as_ref().filter(|s| s.id == session_id) {
                    return Some(session.clone());
                }
            }
        }
        self.ended
            .read()
            .iter()
            .rev()
            .find(|s| s.id == session_id)
            .cloned()
    }

    fn remember_ended(&self, session: RecordingSession) {
        let mut ended = self.ended.write();
        ended.push_back(session);
        while ended.len() > self.ended_history {
            ended.pop_front();
        }
    }
}

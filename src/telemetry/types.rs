/// Telemetry record types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sessions::SessionId;

/// One telemetry sample as persisted
///
/// `session_id == None` means the sample was not accepted for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub sensor_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Live telemetry as broadcast on the "telemetry" channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub device_id: String,
    pub sensor_type: String,
    pub payload: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// Counters exposed by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub ingested: u64,
    pub persisted: u64,
    pub skipped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub dropped: u64,
    pub buffered: usize,
}

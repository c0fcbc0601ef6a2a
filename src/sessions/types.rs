/// Recording session types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Session identifier
pub type SessionId = Uuid;

/// Per-session recording configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sensor allow-list; empty means every sensor
    pub sensor_types: Vec<String>,

    /// Per-sensor maximum persisted rate in Hz (absent = unlimited)
    pub max_frequency_hz: HashMap<String, f64>,

    /// Master switch; a disabled session records nothing
    pub enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sensor_types: Vec::new(),
            max_frequency_hz: HashMap::new(),
            enabled: true,
        }
    }
}

impl SessionConfig {
    /// Allow-list for the given sensors, all other settings default
    pub fn for_sensors<I, S>(sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensor_types: sensors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Enabled, and the sensor is in the allow-list (empty list = every sensor)
    pub fn allows(&self, sensor_type: &str) -> bool {
        self.enabled
            && (self.sensor_types.is_empty() || self.sensor_types.iter().any(|s| s == sensor_type))
    }

    /// Minimum spacing between persisted records of a sensor
    pub fn min_interval_ms(&self, sensor_type: &str) -> Option<i64> {
        self.max_frequency_hz
            .get(sensor_type)
            .filter(|hz| hz.is_finite() && **hz > 0.0)
            .map(|hz| (1000.0 / hz).round() as i64)
    }
}

/// A bounded recording interval for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: SessionId,
    pub device_id: String,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub config: SessionConfig,
}

impl RecordingSession {
    pub fn new(device_id: &str, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            is_active: true,
            started_at: Utc::now(),
            stopped_at: None,
            config,
        }
    }
}

/// How a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndMode {
    /// Keep everything recorded
    Save,
    /// Drop the recording (purges rows when `sessions.discard_purges_records`)
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let all = SessionConfig::default();
        assert!(all.allows("imu"));

        let imu_only = SessionConfig::for_sensors(["imu"]);
        assert!(imu_only.allows("imu"));
        assert!(!imu_only.allows("camera"));

        let disabled = SessionConfig {
            enabled: false,
            ..SessionConfig::default()
        };
        assert!(!disabled.allows("imu"));
    }

    #[test]
    fn test_min_interval() {
        let mut config = SessionConfig::default();
        config.max_frequency_hz.insert("gps".to_string(), 2.0);
        config.max_frequency_hz.insert("bad".to_string(), 0.0);

        assert_eq!(config.min_interval_ms("gps"), Some(500));
        assert_eq!(config.min_interval_ms("bad"), None);
        assert_eq!(config.min_interval_ms("imu"), None);
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: SessionConfig = serde_json::from_str(r#"{"sensor_types":["imu"]}"#).expect("parse");
        assert!(config.enabled);
        assert_eq!(config.sensor_types, vec!["imu".to_string()]);
    }
}

/// Outbound command types
use serde::{Deserialize, Serialize};

/// A command addressed to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub device_id: String,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    /// Linear (m/s) and angular (rad/s) velocity
    Velocity { linear: f64, angular: f64 },

    /// Target pose in the map frame
    Navigation { x: f64, y: f64, orientation: f64 },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Velocity { .. } => "velocity",
            CommandKind::Navigation { .. } => "navigation",
        }
    }
}

impl CommandMessage {
    pub fn velocity(device_id: &str, linear: f64, angular: f64) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind: CommandKind::Velocity { linear, angular },
        }
    }

    pub fn navigation(device_id: &str, x: f64, y: f64, orientation: f64) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind: CommandKind::Navigation { x, y, orientation },
        }
    }

    /// Wire payload sent to the device (parameters only)
    pub fn payload(&self) -> serde_json::Value {
        match &self.kind {
            CommandKind::Velocity { linear, angular } => serde_json::json!({
                "linear": linear,
                "angular": angular,
            }),
            CommandKind::Navigation { x, y, orientation } => serde_json::json!({
                "x": x,
                "y": y,
                "orientation": orientation,
            }),
        }
    }
}

/// Hub message schema - envelope and control messages
///
/// Every message delivered to a subscriber is an [`Envelope`]:
/// - Protocol version
/// - Channel name
/// - Timestamp and per-channel sequence number
/// - Channel-specific data payload
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u8 = 1;

// ============================================================================
// CHANNELS
// ============================================================================

/// Well-known channel names
pub mod channels {
    /// Command acknowledgements and robot status
    pub const ROBOT: &str = "robot";
    /// Live sensor data
    pub const TELEMETRY: &str = "telemetry";
    /// Job progress and status
    pub const ML: &str = "ml";
    /// Chat relay
    pub const CHAT: &str = "chat";
}

// ============================================================================
// MESSAGE ENVELOPE
// ============================================================================

/// Standard hub message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version
    pub v: u8,

    /// Channel the message was broadcast on
    pub channel: String,

    /// Server timestamp (unix milliseconds)
    pub ts: i64,

    /// Sequence number (monotonic per channel, starting at 1)
    pub seq: u64,

    /// Message payload (channel-specific)
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope with current timestamp
    pub fn new(channel: &str, seq: u64, data: serde_json::Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            channel: channel.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            seq,
            data,
        }
    }
}

// ============================================================================
// CLIENT MESSAGES (Client → Server)
// ============================================================================

/// Client control messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Move this connection to a channel
    Subscribe { channel: String },

    /// Leave the current channel
    Unsubscribe,

    /// Keepalive
    Ping {
        #[serde(default)]
        id: Option<String>,
    },

    /// Velocity command for a device
    Velocity {
        device_id: String,
        linear: f64,
        angular: f64,
    },

    /// Navigation goal for a device
    Navigation {
        device_id: String,
        x: f64,
        y: f64,
        #[serde(default)]
        orientation: f64,
    },

    /// Re-broadcast arbitrary data to everyone on the client's channel
    Relay { data: serde_json::Value },
}

// ============================================================================
// SERVER MESSAGES (Server → Client)
// ============================================================================

/// Server messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Data message
    Data(Envelope),

    /// Acknowledge control message
    Ack {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },

    /// Error response
    Error { message: String, code: String },

    /// Pong response to ping
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ServerMessage {
    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let data = json!({"device_id": "r1"});
        let envelope = Envelope::new(channels::TELEMETRY, 7, data.clone());

        assert_eq!(envelope.v, PROTOCOL_VERSION);
        assert_eq!(envelope.channel, "telemetry");
        assert_eq!(envelope.seq, 7);
        assert_eq!(envelope.data, data);
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"velocity","device_id":"r1","linear":0.5,"angular":-0.2}"#)
                .expect("parse");
        assert_eq!(
            msg,
            ClientMessage::Velocity {
                device_id: "r1".to_string(),
                linear: 0.5,
                angular: -0.2,
            }
        );

        let nav: ClientMessage =
            serde_json::from_str(r#"{"type":"navigation","device_id":"r2","x":1.0,"y":2.0}"#).expect("parse");
        assert!(matches!(nav, ClientMessage::Navigation { orientation, .. } if orientation == 0.0));

        let sub: ClientMessage = serde_json::from_str(r#"{"type":"subscribe","channel":"ml"}"#).expect("parse");
        assert_eq!(sub, ClientMessage::Subscribe { channel: "ml".to_string() });
    }

    #[test]
    fn test_server_message_serialization() {
        let json = ServerMessage::Pong { id: Some("p1".to_string()) }.to_json().expect("json");
        assert!(json.contains("\"type\":\"pong\""));

        let data = ServerMessage::Data(Envelope::new("ml", 1, json!({"step": 1})))
            .to_json()
            .expect("json");
        assert!(data.contains("\"type\":\"data\""));
        assert!(data.contains("\"channel\":\"ml\""));
    }
}

/// Structured error types for fleetlink
///
/// One enum per concern. Producers of telemetry and broadcast messages never see
/// delivery errors; command callers see bridge errors synchronously.
use thiserror::Error;

use crate::sessions::SessionId;

// =============================================================================
// MESSAGE BRIDGE
// =============================================================================

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge is not connected to the broker")]
    NotConnected,

    #[error("Publish to '{topic}' timed out after {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },

    #[error("Connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Device {device_id} already has an active session ({active})")]
    Conflict {
        device_id: String,
        active: SessionId,
    },

    #[error("Session storage error: {0}")]
    Storage(#[from] PersistenceError),
}

// =============================================================================
// BROADCAST DELIVERY (internal to the hub)
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Subscriber connection closed")]
    Closed,
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// JOB QUEUE
// =============================================================================

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job execution failed: {0}")]
    Execution(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Job storage error: {0}")]
    Storage(#[from] PersistenceError),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display_is_reason() {
        assert_eq!(JobError::Cancelled.to_string(), "cancelled");
        assert!(JobError::Cancelled.is_cancelled());
        assert!(!JobError::Execution("boom".to_string()).is_cancelled());
    }

    #[test]
    fn test_publish_timeout_message() {
        let err = BridgeError::PublishTimeout {
            topic: "/fleet/r1/cmd_vel".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Publish to '/fleet/r1/cmd_vel' timed out after 250ms");
    }
}

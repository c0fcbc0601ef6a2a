/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the config_struct! macro which provides:
/// - Single-source definition (no repetition)
/// - Embedded defaults
/// - Serde support
use std::time::Duration;

use crate::bridge::QoS;
use crate::config_struct;

// ============================================================================
// FLEET
// ============================================================================

config_struct! {
    /// Fleet identity, used as the first topic segment
    pub struct FleetConfig {
        /// Fleet name (`/<fleet>/<device_id>/...`)
        name: String = "fleet".to_string(),
    }
}

// ============================================================================
// BROADCAST HUB
// ============================================================================

config_struct! {
    /// Broadcast hub delivery settings
    pub struct HubConfig {
        /// Per-subscriber delivery deadline; slower subscribers are evicted
        delivery_timeout_ms: u64 = 1_000,

        /// Queue size for queue-backed subscribers (WebSocket clients)
        subscriber_queue_size: usize = 256,
    }
}

impl HubConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

// ============================================================================
// MESSAGE BRIDGE
// ============================================================================

config_struct! {
    /// Broker bridge settings
    pub struct BridgeConfig {
        /// Hard deadline for a single publish
        publish_timeout_ms: u64 = 2_000,

        /// Hard deadline for establishing the broker session
        connect_timeout_ms: u64 = 5_000,

        /// Inbound message queue between transport and dispatcher
        inbound_queue_size: usize = 1_024,

        /// QoS used for command publishes
        default_qos: QoS = QoS::AtLeastOnce,

        /// Connect automatically when the bridge service starts
        connect_on_start: bool = true,
    }
}

impl BridgeConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ============================================================================
// TELEMETRY PIPELINE
// ============================================================================

config_struct! {
    /// Telemetry buffering and flush policy
    pub struct TelemetryConfig {
        /// Buffer capacity; reaching it triggers a flush
        buffer_capacity: usize = 100,

        /// Upper bound on records held while flushes keep failing
        max_retained: usize = 10_000,

        /// Periodic flush interval (0 disables the timer)
        flush_interval_ms: u64 = 5_000,

        /// Force a flush after every accepted record (low-traffic deployments)
        flush_after_ingest: bool = false,
    }
}

impl TelemetryConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        if self.flush_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.flush_interval_ms))
        }
    }
}

// ============================================================================
// RECORDING SESSIONS
// ============================================================================

config_struct! {
    /// Recording session behavior
    pub struct SessionsConfig {
        /// Discarding a session also deletes its persisted telemetry
        discard_purges_records: bool = false,

        /// Reload sessions marked active in storage at startup
        restore_on_start: bool = true,

        /// Ended sessions kept in memory for `session(id)` lookups
        ended_history: usize = 1_024,
    }
}

// ============================================================================
// JOB QUEUE
// ============================================================================

config_struct! {
    /// Background job queue
    pub struct JobsConfig {
        /// Log a warning when this many jobs are waiting
        queue_depth_warning: usize = 16,

        /// Finished jobs kept in memory for `job(id)` / `list()`
        retained_finished: usize = 1_024,
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

config_struct! {
    /// Outbound command handling
    pub struct CommandsConfig {
        /// Persist an audit row for every issued command
        audit: bool = true,
    }
}

// ============================================================================
// DATABASE
// ============================================================================

config_struct! {
    /// SQLite storage
    pub struct DatabaseConfig {
        /// Database file path; empty keeps everything in memory
        path: String = "data/fleetlink.db".to_string(),

        write_pool_size: u32 = 2,

        read_pool_size: u32 = 8,

        connection_timeout_ms: u64 = 30_000,
    }
}

// ============================================================================
// WEBSERVER
// ============================================================================

config_struct! {
    /// WebSocket binding for UI clients
    pub struct WebserverConfig {
        enabled: bool = true,

        bind: String = "127.0.0.1:8080".to_string(),
    }
}

// ============================================================================
// LOGGING
// ============================================================================

config_struct! {
    /// Log output
    pub struct LoggingConfig {
        /// Plain-text log file; empty disables file logging
        file: String = "data/logs/fleetlink.log".to_string(),
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration structure containing all sub-configurations
    pub struct Config {
        fleet: FleetConfig = FleetConfig::default(),

        hub: HubConfig = HubConfig::default(),

        bridge: BridgeConfig = BridgeConfig::default(),

        telemetry: TelemetryConfig = TelemetryConfig::default(),

        sessions: SessionsConfig = SessionsConfig::default(),

        jobs: JobsConfig = JobsConfig::default(),

        commands: CommandsConfig = CommandsConfig::default(),

        database: DatabaseConfig = DatabaseConfig::default(),

        webserver: WebserverConfig = WebserverConfig::default(),

        logging: LoggingConfig = LoggingConfig::default(),
    }
}

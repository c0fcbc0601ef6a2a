/// Configuration utilities - loading and validation
///
/// The configuration is read once at startup and passed explicitly to the
/// components that need it.
use std::path::Path;

use super::schemas::Config;
use crate::errors::ConfigError;
use crate::logger::{self, LogTag};

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/fleetlink.toml";

/// Load configuration from the default path
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(CONFIG_FILE_PATH)
}

/// Load configuration from a specific file path
///
/// A missing file yields the defaults from the schema definitions. The result
/// is validated before it is returned.
pub fn load_config_from_path(path: &str) -> Result<Config, ConfigError> {
    let config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        parse_config(path, &contents)?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path),
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

pub fn parse_config(path: &str, contents: &str) -> Result<Config, ConfigError> {
    toml::from_str::<Config>(contents).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    /// Reject values that would make a component unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.name.is_empty() || self.fleet.name.contains('/') {
            return Err(invalid("fleet.name", "must be a non-empty single topic segment"));
        }
        if self.hub.delivery_timeout_ms == 0 {
            return Err(invalid("hub.delivery_timeout_ms", "must be greater than zero"));
        }
        if self.hub.subscriber_queue_size == 0 {
            return Err(invalid("hub.subscriber_queue_size", "must be greater than zero"));
        }
        if self.bridge.publish_timeout_ms == 0 {
            return Err(invalid("bridge.publish_timeout_ms", "must be greater than zero"));
        }
        if self.bridge.inbound_queue_size == 0 {
            return Err(invalid("bridge.inbound_queue_size", "must be greater than zero"));
        }
        if self.telemetry.buffer_capacity == 0 {
            return Err(invalid("telemetry.buffer_capacity", "must be greater than zero"));
        }
        if self.telemetry.max_retained < self.telemetry.buffer_capacity {
            return Err(invalid(
                "telemetry.max_retained",
                "must be at least telemetry.buffer_capacity",
            ));
        }
        if self.database.write_pool_size == 0 || self.database.read_pool_size == 0 {
            return Err(invalid("database", "pool sizes must be greater than zero"));
        }
        Ok(())
    }
}

/// Logger configuration and command-line flag parsing
///
/// Recognized flags:
/// - `--quiet`: only errors and warnings
/// - `--verbose`: everything, including verbose level
/// - `--debug-<tag>`: debug level for one tag (`--debug-all` for every tag)
/// - `--verbose-<tag>`: verbose level for one tag
/// - `--log-tags=<a,b>`: restrict info/warning output to the listed tags
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

use super::levels::LogLevel;
use super::tags::LogTag;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level shown (messages above it are filtered)
    pub min_level: LogLevel,

    /// Tags with debug output enabled
    pub debug_tags: HashSet<String>,

    /// Tags with verbose output enabled
    pub verbose_tags: HashSet<String>,

    /// If non-empty, only these tags are shown (errors excepted)
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Get a copy of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Replace the logger configuration
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub(super) fn with_logger_config<F, R>(f: F) -> R
where
    F: FnOnce(&LoggerConfig) -> R,
{
    f(&LOGGER_CONFIG.read())
}

/// Build the configuration from command-line arguments and install it
pub fn init_from_args(args: &[String]) {
    set_logger_config(parse_args(args));
}

pub(super) fn parse_args(args: &[String]) -> LoggerConfig {
    let mut config = LoggerConfig::default();

    for arg in args {
        if arg == "--quiet" {
            config.min_level = LogLevel::Warning;
        } else if arg == "--verbose" {
            config.min_level = LogLevel::Verbose;
        } else if arg == "--debug-all" {
            config.min_level = config.min_level.max(LogLevel::Debug);
            for tag in LogTag::ALL {
                config.debug_tags.insert(tag.to_debug_key());
            }
        } else if let Some(key) = arg.strip_prefix("--debug-") {
            config.min_level = config.min_level.max(LogLevel::Debug);
            config.debug_tags.insert(key.to_string());
        } else if let Some(key) = arg.strip_prefix("--verbose-") {
            config.min_level = config.min_level.max(LogLevel::Verbose);
            config.debug_tags.insert(key.to_string());
            config.verbose_tags.insert(key.to_string());
        } else if let Some(list) = arg.strip_prefix("--log-tags=") {
            config.enabled_tags = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    config
}

pub(super) fn is_debug_enabled_for_tag(config: &LoggerConfig, tag: &LogTag) -> bool {
    config.debug_tags.contains(&tag.to_debug_key())
}

pub(super) fn is_verbose_enabled_for_tag(config: &LoggerConfig, tag: &LogTag) -> bool {
    config.verbose_tags.contains(&tag.to_debug_key())
}

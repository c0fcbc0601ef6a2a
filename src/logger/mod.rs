//! Structured logging for fleetlink
//!
//! Tag/level API used across the crate:
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-subsystem debug control via `--debug-<tag>` flags
//! - Colored console output plus optional plain-text file
//!
//! ## Usage
//!
//! ```rust
//! use fleetlink::logger::{self, LogTag};
//!
//! logger::error(LogTag::Bridge, "Broker connection lost");
//! logger::info(LogTag::Sessions, "Session started for r1");
//! logger::debug(LogTag::Hub, "Delivered to 3 subscribers"); // Only if --debug-hub
//! ```
//!
//! Call [`init`] once at startup, before services start.

mod config;
mod core;
mod facade;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Parses debug flags from `args`, opens the log file when one is given and
/// routes `log` crate records from dependencies into the same sink.
pub fn init(args: &[String], log_file: Option<&str>) {
    config::init_from_args(args);

    if let Some(path) = log_file {
        if let Err(e) = file::init_file_logging(path) {
            warning(LogTag::System, &format!("File logging disabled: {}", e));
        }
    }

    facade::install();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (shown unless --quiet)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level
///
/// Only shown when the `--debug-<tag>` flag for this tag was given.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (--verbose or --verbose-<tag>)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Check whether debug output is enabled for a tag
///
/// Lets callers skip building expensive debug strings.
pub fn is_debug_enabled(tag: LogTag) -> bool {
    core::should_log(&tag, LogLevel::Debug)
}

/// Force flush pending log file writes
pub fn flush() {
    file::flush_file_logging();
}

/// Core logging implementation with automatic filtering
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Messages above the minimum level threshold are dropped
/// 3. Debug level requires --debug-<tag> for that tag
/// 4. Verbose level requires --verbose or --verbose-<tag>
/// 5. If enabled_tags is non-empty, the tag must be in the set
use super::config::{is_debug_enabled_for_tag, is_verbose_enabled_for_tag, with_logger_config};
use super::levels::LogLevel;
use super::tags::LogTag;

pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    if level == LogLevel::Error {
        return true;
    }

    with_logger_config(|config| {
        if level > config.min_level {
            return false;
        }

        if level == LogLevel::Debug {
            return is_debug_enabled_for_tag(config, tag);
        }

        if level == LogLevel::Verbose {
            return config.min_level == LogLevel::Verbose && config.verbose_tags.is_empty()
                || is_verbose_enabled_for_tag(config, tag);
        }

        if !config.enabled_tags.is_empty() && !config.enabled_tags.contains(&tag.to_debug_key()) {
            return false;
        }

        true
    })
}

pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level, message);
}

/// Bridge from the `log` facade into the tag logger
///
/// Dependencies that log through `log::*` macros end up in the same console and
/// file output, tagged as SYSTEM.
use super::levels::LogLevel;
use super::tags::LogTag;

struct LogFacade;

static FACADE: LogFacade = LogFacade;

impl log::Log for LogFacade {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        super::core::should_log(&LogTag::System, LogLevel::from(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("{}: {}", record.target(), record.args());
        super::core::log_internal(LogTag::System, LogLevel::from(record.level()), &message);
    }

    fn flush(&self) {
        super::file::flush_file_logging();
    }
}

/// Install the facade; a second call is a no-op
pub fn install() {
    if log::set_logger(&FACADE).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
}

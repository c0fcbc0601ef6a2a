//! Log formatting and output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized console output with tag and level formatting
//! - Text wrapping at word boundaries
//! - Dual output (console + file)
//! - Broken pipe handling for piped commands

use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LEVEL_WIDTH: usize = 7;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let prefix = format!("{} ", time).dimmed().to_string();
    let base_line = format!("{}[{}] [{}] ", prefix, format_tag(&tag), format_level(level));

    // Width of "HH:MM:SS [TAG] [LEVEL] " without ANSI codes
    let base_length = time.len() + 1 + TAG_WIDTH + 3 + LEVEL_WIDTH + 3;
    let available_space = if MAX_LINE_LENGTH > base_length + 20 {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    let chunks = wrap_text(message, available_space);
    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let tag_clean = tag.to_plain_string();

    for (i, chunk) in chunks.iter().enumerate() {
        let console_line = if i == 0 {
            format!("{}{}", base_line, chunk)
        } else {
            format!("{}{}", " ".repeat(base_length), chunk)
        };
        print_stdout_safe(&console_line);
        write_to_file(&format!("{} [{}] [{}] {}", timestamp, tag_clean, level.as_str(), chunk));
    }
}

/// Format a tag with appropriate color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.bright_white().bold(),
        LogTag::Hub => label.bright_cyan().bold(),
        LogTag::Bridge => label.bright_blue().bold(),
        LogTag::Sessions => label.bright_magenta().bold(),
        LogTag::Telemetry => label.bright_green().bold(),
        LogTag::Jobs => label.bright_purple().bold(),
        LogTag::Storage => label.white().bold(),
        LogTag::Commands => label.bright_red().bold(),
        LogTag::Websocket => label.cyan().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.yellow().bold(),
        LogLevel::Info => label.green(),
        LogLevel::Debug => label.blue(),
        LogLevel::Verbose => label.dimmed(),
    }
}

/// Split text into chunks at word boundaries
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split(' ') {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }

    lines
}

/// Print to stdout, ignoring broken pipes (e.g. `fleetlink | head`)
fn print_stdout_safe(line: &str) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() != ErrorKind::BrokenPipe {
            eprintln!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_respects_width() {
        let lines = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_wrap_text_empty_message() {
        assert_eq!(wrap_text("", 20), vec![String::new()]);
    }
}

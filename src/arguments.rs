/// Command-line arguments
///
/// Per-tag logger flags (`--debug-<tag>`, `--verbose-<tag>`, `--log-tags=`)
/// are free-form, so they are split off before clap sees the rest. `--quiet`
/// and `--verbose` are declared here and also reach the logger.
use clap::Parser;

use crate::config::{Config, CONFIG_FILE_PATH};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fleetlink")]
#[command(about = "Telemetry relay, command distribution and job streaming for robot fleets", long_about = None)]
pub struct Args {
    /// Configuration file
    #[arg(long, default_value = CONFIG_FILE_PATH)]
    pub config: String,

    /// SQLite database path (overrides config; empty = in-memory)
    #[arg(long)]
    pub db: Option<String>,

    /// WebSocket bind address (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// Disable the WebSocket server
    #[arg(long)]
    pub no_web: bool,

    /// Only warnings and errors
    #[arg(long)]
    pub quiet: bool,

    /// Verbose output for every tag
    #[arg(long)]
    pub verbose: bool,
}

fn is_logger_flag(arg: &str) -> bool {
    arg.starts_with("--debug-") || arg.starts_with("--verbose-") || arg.starts_with("--log-tags=")
}

/// Split raw arguments into (clap arguments, logger arguments)
pub fn split_logger_flags(args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut cli = Vec::with_capacity(args.len());
    let mut logger = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        if i > 0 && is_logger_flag(arg) {
            logger.push(arg.clone());
        } else {
            if arg == "--quiet" || arg == "--verbose" {
                logger.push(arg.clone());
            }
            cli.push(arg.clone());
        }
    }

    (cli, logger)
}

impl Args {
    /// Parse from raw arguments; returns the logger flags alongside
    pub fn parse_with_logger_flags(args: &[String]) -> (Self, Vec<String>) {
        let (cli, logger) = split_logger_flags(args);
        (Self::parse_from(cli), logger)
    }

    /// Apply command-line overrides on top of the loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.database.path = db.clone();
        }
        if let Some(bind) = &self.bind {
            config.webserver.bind = bind.clone();
        }
        if self.no_web {
            config.webserver.enabled = false;
        }
    }
}

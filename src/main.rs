use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Notify;

use fleetlink::app::App;
use fleetlink::arguments::Args;
use fleetlink::config::load_config_from_path;
use fleetlink::logger::{self, LogTag};

#[tokio::main]
async fn main() -> Result<()> {
    let raw: Vec<String> = std::env::args().collect();
    let (args, logger_flags) = Args::parse_with_logger_flags(&raw);

    let mut config = load_config_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    args.apply_overrides(&mut config);

    let log_file = Some(config.logging.file.as_str()).filter(|path| !path.is_empty());
    logger::init(&logger_flags, log_file);
    logger::info(
        LogTag::System,
        &format!("fleetlink {} starting (fleet: {})", env!("CARGO_PKG_VERSION"), config.fleet.name),
    );

    let app = App::build(config).context("Failed to open storage")?;
    app.restore_sessions()
        .await
        .context("Failed to restore recording sessions")?;

    let mut manager = app.service_manager();
    if let Err(e) = manager.start_all().await {
        logger::error(LogTag::System, &format!("Startup failed: {}", e));
        let _ = manager.stop_all().await;
        logger::flush();
        anyhow::bail!("startup failed: {}", e);
    }

    let interrupted = Arc::new(Notify::new());
    let signal = interrupted.clone();
    ctrlc::set_handler(move || signal.notify_one()).context("Failed to install Ctrl-C handler")?;

    interrupted.notified().await;
    logger::info(LogTag::System, "Shutdown requested");

    if let Err(e) = manager.stop_all().await {
        logger::error(LogTag::System, &format!("Shutdown error: {}", e));
    }
    logger::flush();
    Ok(())
}

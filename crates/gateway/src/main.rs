// Logging behavior:
// - Writes logs to both stderr and a daily-rotated file at logs/gateway.log.
// - Default log level comes from the resolved config's `log_level`, overridable via RUST_LOG.
// - The logs/ directory is created on startup if missing; file output uses a non-blocking writer.
// - File layer disables ANSI to keep logs clean for analysis.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fme_foundation::{AppState, GatewayConfig, ShutdownHandler};
use gateway::AudioFrontController;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "Radio selcall gateway")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print candidate input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Override the configured input device name.
    #[arg(long)]
    device: Option<String>,

    /// Override `log_level` from the resolved configuration.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "gateway.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Prune rotated log files in `logs/` older than 7 days.
fn prune_old_logs() {
    let cutoff = match SystemTime::now().checked_sub(Duration::from_secs(7 * 24 * 60 * 60)) {
        Some(t) => t,
        None => return,
    };

    let logs_dir = Path::new("logs");
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with("gateway.log.") {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(modified) = meta.modified() {
                if modified < cutoff {
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.list_devices {
        for name in AudioFrontController::list_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.device = Some(device);
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;

    let _log_guard = init_logging(&config.log_level)?;
    prune_old_logs();

    let shutdown = ShutdownHandler::new().install().await;

    let on_error = std::sync::Arc::new(move |err: fme_foundation::GatewayError| {
        tracing::error!(%err, recovery = ?err.recovery_strategy(), "pipeline runtime error");
    });

    let mut controller = AudioFrontController::new(config, on_error);
    controller.start()?;
    tracing::info!(state = ?controller.state(), "gateway running");

    shutdown.wait().await;
    tracing::info!("shutdown signal received, stopping pipeline");
    controller.stop()?;
    tracing::info!(state = ?AppState::Stopped, "gateway stopped");

    Ok(())
}

//! flightdeck - durable flight engine operator CLI
//!
//! Inspects runs in the configured store and validates configuration.

mod cli;
mod commands;

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use flightdeck_config::{ConfigLoader, LoggingConfig};

use crate::cli::{Cli, Commands};

/// Console plus daily-rotated file logging.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = logging.resolved_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("flightdeck")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keeps the background writer alive for the whole process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> = std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = if logging.json {
        fmt::layer().json().with_writer(non_blocking).boxed()
    } else {
        fmt::layer().with_writer(non_blocking).with_ansi(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig = cli.command {
        return commands::check_config(&cli.config);
    }

    let config = ConfigLoader::load_or_default(&cli.config)?;
    init_tracing(&config.logging)?;
    tracing::debug!(config = %cli.config.display(), backend = ?config.store.backend, "Configuration loaded");

    match cli.command {
        Commands::Status { run_id, json } => commands::status(&config, &run_id, json).await,
        Commands::List { statuses } => commands::list(&config, &statuses).await,
        Commands::CheckConfig => Ok(()),
    }
}

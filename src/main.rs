use std::path::Path;
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tinyinfer::cli::{self, Cli};
use tinyinfer::config::Settings;

/// Main entry point for the tinyinfer command line
///
/// Loads settings, installs file logging and runs the requested subcommand.
///
/// # Errors
/// Returns an error if the configuration is invalid or the command fails
fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Load settings first
    let settings = match &args.config {
        Some(dir) => Settings::load(dir),
        None => Settings::new(),
    }
    .context("loading configuration")?;

    let log_dir = settings.logging.directory.as_deref().unwrap_or_else(|| Path::new("logs"));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        log_dir,
        "tinyinfer",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(filter);
    if settings.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("tinyinfer {} starting", env!("CARGO_PKG_VERSION"));
    let full_log_path = std::fs::canonicalize(log_dir)?;
    info!("Log directory: {}", full_log_path.display());

    cli::run(args, &settings)
}

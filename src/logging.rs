//! Logging setup for the two ways the binary runs.
//!
//! The long-lived `start` watcher logs structured JSON to a daily-rotated
//! file and mirrors human-readable output to stderr; one-shot subcommands
//! get the stderr layer only. Both honor `RUST_LOG` when set.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix for rotated log files (`logsentry.log.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "logsentry.log";

/// Keeps the background log writer alive.
///
/// File output goes through a non-blocking worker; entries buffered there
/// are only flushed when this guard drops, so the caller holds it until
/// process exit.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Set up watcher-mode logging: JSON file with daily rotation plus a
/// stderr console layer.
///
/// `default_level` applies when `RUST_LOG` is unset.
///
/// # Errors
///
/// Fails if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path, default_level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (file_writer, guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX),
    );

    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Set up stderr-only logging for one-shot subcommands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_writer(std::io::stderr)
        .init();
}

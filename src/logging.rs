//! Log setup for the two ways the binary runs.
//!
//! `start` keeps a relay alive for days, so [`init_production`] writes one
//! JSON object per event to a daily file under the logs directory, where
//! per-post fields (`channel`, `message_id`, `group`, `rule`) can be
//! searched, and mirrors readable lines to stderr. `check` exits after
//! printing a summary and only needs stderr, which [`init_cli`] sets up.
//! Both honour `RUST_LOG` and default to `info`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the rotated log files (`channel-relay.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "channel-relay.log";

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Default log directory (`~/.channel-relay/logs`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_logs_dir() -> anyhow::Result<PathBuf> {
    Ok(crate::config::config_dir()?.join("logs"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise logging for the `start` subcommand.
///
/// Writes JSON logs to `{logs_dir}/channel-relay.log.YYYY-MM-DD` and
/// human-readable output to stderr, both filtered by `RUST_LOG`
/// (default: `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging for `check`.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

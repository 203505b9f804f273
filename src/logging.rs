//! Log output for the long-running collector and the offline subcommands.
//!
//! `herald run` keeps a machine-readable trail of every evaluated message,
//! audience change and delivery attempt in `<logs_dir>/herald.log.<date>`,
//! one JSON object per line, and mirrors the same events to stderr so the
//! operator console stays readable on stdout. `herald audience` only needs
//! stderr.
//!
//! The configured `log_level` is the fallback filter; `RUST_LOG` overrides it.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the daily log files; the appender adds the date suffix.
const LOG_FILE_PREFIX: &str = "herald.log";

/// Keeps the background log writer alive.
///
/// Hold it in `main` for the whole run; dropping it flushes buffered lines
/// and stops file logging.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install JSON file logging plus stderr output for `herald run`.
///
/// # Errors
///
/// Fails when `logs_dir` cannot be created or another subscriber is already
/// installed in this process.
pub fn init_service(logs_dir: &Path, level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("cannot create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("log subscriber already installed")?;

    Ok(LoggingGuard { _writer: guard })
}

/// Install stderr-only logging for `herald audience`, keeping stdout for results.
///
/// A subscriber that is already installed is left in place.
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}

//! Structured Logger
//!
//! Wraps `tracing` to provide console output, a daily rolling NDJSON file and
//! environment-based level control (`RUST_LOG` wins over the configured level).

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the file writer alive; dropping it flushes pending lines.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Initialize the global structured logger.
///
/// `json` switches the console layer to JSON; the file is always NDJSON at
/// `<log_dir>/icy.log.YYYY-MM-DD`. Calling it twice keeps the first subscriber.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str, json: bool) -> Result<LogGuard> {
    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "icy.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false);

    // Console goes to stderr so command output on stdout stays clean.
    let console_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(LogGuard { _file: guard })
}

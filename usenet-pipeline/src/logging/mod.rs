//! Tracing setup: console output plus an optional daily log file, both
//! stamped in local time.

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingConfig;
use crate::utils::fs;

/// Log file prefix inside the configured log directory.
const LOG_FILE_NAME: &str = "usenet-pipeline.log";

/// Timestamps in the machine's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter from `RUST_LOG`, falling back to the configured directive.
fn build_filter(config: &LoggingConfig) -> crate::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| crate::Error::config(format!("Invalid log filter directive: {e}"))),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the program. It is `None` when no log directory is set.
pub fn init_logging(config: &LoggingConfig) -> crate::Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync_with_op("creating log directory", dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

//! Tracing subscriber setup.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SyncError};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "LARDER_LOG";

const DEFAULT_FILTER: &str = "larder=info";

/// Default directory for log files: <data_dir>/larder/logs.
pub fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| SyncError::Config("Could not determine data directory".to_string()))?;

  Ok(data_dir.join("larder").join("logs"))
}

/// Install the global subscriber, writing to a daily-rolling file in `log_dir`.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir).map_err(|e| {
    SyncError::Config(format!(
      "Failed to create log directory {}: {}",
      log_dir.display(),
      e
    ))
  })?;

  let appender = tracing_appender::rolling::daily(log_dir, "larder.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| SyncError::Config(format!("Failed to install log subscriber: {}", e)))?;

  Ok(guard)
}

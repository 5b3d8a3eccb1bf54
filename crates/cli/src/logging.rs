//! Logging setup for the rekindle service

use rekindle_core::ServiceConfig;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Get the rekindle data directory (log files live here)
pub fn data_dir() -> PathBuf {
  dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("rekindle")
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging with config-driven settings.
///
/// In foreground mode: logs to console with colors.
/// In background mode: logs to file only (no ANSI).
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init(service: &ServiceConfig, background: bool) -> Option<WorkerGuard> {
  let level = parse_log_level(&service.log_level);

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  if !background {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = data_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    // Fall back to console-only logging
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    return None;
  }

  let file_appender = match service.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, "rekindle.log"),
    "never" => tracing_appender::rolling::never(&log_dir, "rekindle.log"),
    _ => tracing_appender::rolling::daily(&log_dir, "rekindle.log"),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

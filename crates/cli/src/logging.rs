//! Logging setup for the CLI

use docflow_core::LogConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "docflow.log";

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

fn env_filter(config: &LogConfig) -> EnvFilter {
  // RUST_LOG wins over the configured level
  EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy()
}

fn init_console_logging(config: &LogConfig) {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_ansi(true)
    .init();
}

/// Initialize logging from the `[log]` config section.
///
/// Without a log directory everything goes to the console. With one, logs are
/// written to a rolling file and the returned guard must be held until exit so
/// buffered lines get flushed.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
  let Some(log_dir) = config.dir.as_ref() else {
    init_console_logging(config);
    return None;
  };

  if std::fs::create_dir_all(log_dir).is_err() {
    // Fall back to console-only logging
    init_console_logging(config);
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(log_dir, LOG_FILE_NAME),
    "never" => tracing_appender::rolling::never(log_dir, LOG_FILE_NAME),
    _ => tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter(config))
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

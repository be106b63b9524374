//! Logging setup for CLI commands and the daemon

use std::path::Path;

use docsync::config::DaemonConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// Initialize logging for CLI commands (console only, warnings and up)
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();
}

/// `daemon.log_level` as a filter; unrecognized values mean `info`.
fn parse_log_level(level: &str) -> LevelFilter {
  level.trim().parse().unwrap_or(LevelFilter::INFO)
}

/// Daemon logging: colored console in the foreground, otherwise a rolling
/// `docsync.log` in `log_dir` per `daemon.log_rotation`.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_daemon_logging(config: &DaemonConfig, log_dir: &Path, foreground: bool) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.log_level).into())
    .from_env_lossy();

  if foreground {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  if let Err(e) = std::fs::create_dir_all(log_dir) {
    eprintln!("Cannot create log dir {}: {}, logging to console", log_dir.display(), e);
    init_cli_logging();
    return None;
  }

  let file_appender = match config.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(log_dir, docsync::dirs::LOG_FILE_PREFIX),
    "never" => tracing_appender::rolling::never(log_dir, docsync::dirs::LOG_FILE_PREFIX),
    _ => tracing_appender::rolling::daily(log_dir, docsync::dirs::LOG_FILE_PREFIX),
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

//! Daemon command

use std::{
  path::Path,
  process::{Command, Stdio},
};

use anyhow::{Context, Result};
use docsync::{Daemon, RuntimeConfig};
use tracing::info;

use crate::logging::init_daemon_logging;

/// Start the daemon.
///
/// Without `--foreground` this re-executes the binary detached with
/// `daemon --background` and returns once it is spawned.
pub async fn cmd_daemon(config: Option<&Path>, foreground: bool, background: bool) -> Result<()> {
  if !foreground && !background {
    let pid = spawn_detached(config)?;
    println!("docsync daemon started (pid {})", pid);
    return Ok(());
  }

  let runtime_config = RuntimeConfig {
    foreground,
    ..RuntimeConfig::load(config).context("Failed to load config")?
  };
  let _guard = init_daemon_logging(
    &runtime_config.config.daemon,
    &runtime_config.data_dir,
    runtime_config.foreground,
  );

  info!("Starting docsync daemon");
  Daemon::new(runtime_config)
    .run()
    .await
    .context("Failed to run daemon")?;
  Ok(())
}

fn spawn_detached(config: Option<&Path>) -> Result<u32> {
  let exe = std::env::current_exe().context("Failed to locate executable")?;
  let mut command = Command::new(exe);
  command.arg("daemon").arg("--background");
  if let Some(path) = config {
    command.arg("--config").arg(path);
  }
  let child = command
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .context("Failed to spawn daemon")?;
  Ok(child.id())
}

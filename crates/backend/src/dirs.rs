//! Data and config directory resolution
//!
//! Each directory is resolved from an explicit override variable, then the XDG
//! variable (with an app subdirectory), then the platform default from `dirs`.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "docsync";

/// Name of the rolling log file (rotated files carry a date suffix).
pub const LOG_FILE_PREFIX: &str = "docsync.log";

/// Logs live here: `DATA_DIR`, `XDG_DATA_HOME/docsync`, or the platform local data dir.
pub fn default_data_dir() -> PathBuf {
  resolve("DATA_DIR", "XDG_DATA_HOME", dirs::data_local_dir())
}

/// `config.toml` lives here: `CONFIG_DIR`, `XDG_CONFIG_HOME/docsync`, or the platform config dir.
pub fn default_config_dir() -> PathBuf {
  resolve("CONFIG_DIR", "XDG_CONFIG_HOME", dirs::config_dir())
}

/// Whether `name` is one of our log files, rotated or not.
pub fn is_log_file(name: &str) -> bool {
  name.starts_with(LOG_FILE_PREFIX)
}

fn resolve(override_var: &str, xdg_var: &str, platform: Option<PathBuf>) -> PathBuf {
  pick(
    std::env::var_os(override_var).map(PathBuf::from),
    std::env::var_os(xdg_var).map(PathBuf::from),
    platform,
  )
}

fn pick(explicit: Option<PathBuf>, xdg: Option<PathBuf>, platform: Option<PathBuf>) -> PathBuf {
  if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
    return dir;
  }
  let base = xdg
    .filter(|d| !d.as_os_str().is_empty())
    .or(platform)
    .unwrap_or_else(|| Path::new(".").to_path_buf());
  base.join(APP_DIR)
}

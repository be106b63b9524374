//! Configuration system for docsync.
//!
//! Config priority: explicit path (`--config`) > user (~/.config/docsync/config.toml) > defaults

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("{section}.backend = \"remote\" requires {section}.url")]
  MissingUrl { section: &'static str },
}

// ============================================================================
// Backend selection
// ============================================================================

/// Where a store keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// In-process map (single binary deployment)
  #[default]
  Memory,
  /// Another docsync instance reached over HTTP
  Remote,
}

// ============================================================================
// Watcher Configuration
// ============================================================================

/// File event watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  /// Root holding one directory per user (`{root}/{username}/...`)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub personal_root: Option<PathBuf>,

  /// Root holding one directory per shared space (`{root}/{space}/...`)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub spaces_root: Option<PathBuf>,

  /// Quiet period before a change is published, in milliseconds (default: 2000)
  pub stability_ms: u64,

  /// Poll interval for the fallback polling backend in seconds (default: 2)
  pub poll_interval_secs: u64,

  /// Publish `add` events for existing files when the watcher starts (default: false)
  pub initial_scan: bool,

  /// Additional gitignore-style patterns to ignore
  pub extra_ignores: Vec<String>,

  /// Access level attached to events of each named space (e.g. "read", "write")
  pub space_access: HashMap<String, String>,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      personal_root: None,
      spaces_root: None,
      stability_ms: 2000,
      poll_interval_secs: 2,
      initial_scan: false,
      extra_ignores: Vec::new(),
      space_access: HashMap::new(),
    }
  }
}

impl WatcherConfig {
  pub fn stability(&self) -> Duration {
    Duration::from_millis(self.stability_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }
}

// ============================================================================
// Workers Configuration
// ============================================================================

/// Processing worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
  /// Sleep when all three priority queues are empty, in milliseconds (default: 1000)
  pub idle_poll_ms: u64,

  /// Sleep after a failed item or unreachable queue, in milliseconds (default: 5000)
  pub error_backoff_ms: u64,

  /// Attempts before a retryable failure is dead-lettered (default: 3)
  pub max_attempts: u32,

  /// Keep exhausted and malformed tasks on `{concern}-dead-letter` (default: true)
  pub dead_letter: bool,

  /// Files larger than this are reduced to a metadata stub (default: 5MB)
  pub max_content_bytes: u64,
}

impl Default for WorkersConfig {
  fn default() -> Self {
    Self {
      idle_poll_ms: 1000,
      error_backoff_ms: 5000,
      max_attempts: 3,
      dead_letter: true,
      max_content_bytes: 5 * 1024 * 1024,
    }
  }
}

impl WorkersConfig {
  pub fn idle_poll(&self) -> Duration {
    Duration::from_millis(self.idle_poll_ms)
  }

  pub fn error_backoff(&self) -> Duration {
    Duration::from_millis(self.error_backoff_ms)
  }
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Priority queue store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Backend: memory or remote (default: memory)
  pub backend: BackendKind,

  /// Base URL of the remote docsync instance (remote backend only)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  /// Number of most recently active queues kept in statistics (default: 100)
  pub stats_capacity: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::Memory,
      url: None,
      stats_capacity: 100,
    }
  }
}

/// Cache store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Backend: memory or remote (default: memory)
  pub backend: BackendKind,

  /// Base URL of the remote docsync instance (remote backend only)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Scheduler and restart policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Tick used to approximate cron expressions, in seconds (default: 60)
  pub cron_tick_secs: u64,

  /// Delay before restarting a crashed critical task, in seconds (default: 5)
  pub restart_backoff_secs: u64,

  /// Task names restarted after a crash
  pub critical_tasks: Vec<String>,

  /// Number of most recently run tasks kept in statistics (default: 100)
  pub stats_capacity: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      cron_tick_secs: 60,
      restart_backoff_secs: 5,
      critical_tasks: vec!["file-watcher".to_string()],
      stats_capacity: 100,
    }
  }
}

impl SchedulerConfig {
  pub fn cron_tick(&self) -> Duration {
    Duration::from_secs(self.cron_tick_secs)
  }

  pub fn restart_backoff(&self) -> Duration {
    Duration::from_secs(self.restart_backoff_secs)
  }

  pub fn is_critical(&self, task: &str) -> bool {
    self.critical_tasks.iter().any(|t| t == task)
  }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Listen address (default: 127.0.0.1:7410)
  pub bind: String,

  /// Readiness probe attempts before startup is aborted (default: 10)
  pub status_retries: u32,

  /// Delay between readiness probe attempts, in milliseconds (default: 500)
  pub status_delay_ms: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:7410".to_string(),
      status_retries: 10,
      status_delay_ms: 500,
    }
  }
}

impl ServerConfig {
  pub fn base_url(&self) -> String {
    format!("http://{}", self.bind)
  }

  pub fn status_delay(&self) -> Duration {
    Duration::from_millis(self.status_delay_ms)
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

/// Daemon lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  #[serde(default = "default_log_level")]
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  #[serde(default = "default_log_rotation")]
  pub log_rotation: String,

  /// Maximum log file age in days (0 = keep forever)
  /// Default: 7
  #[serde(default = "default_log_retention_days")]
  pub log_retention_days: u64,

  /// Time workers get to finish their current item on shutdown
  /// Default: 5
  #[serde(default = "default_shutdown_grace_secs")]
  pub shutdown_grace_secs: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_log_rotation() -> String {
  "daily".to_string()
}
fn default_log_retention_days() -> u64 {
  7
}
fn default_shutdown_grace_secs() -> u64 {
  5
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      log_rotation: default_log_rotation(),
      log_retention_days: default_log_retention_days(),
      shutdown_grace_secs: default_shutdown_grace_secs(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// docsync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(default)]
  pub watcher: WatcherConfig,

  #[serde(default)]
  pub workers: WorkersConfig,

  #[serde(default)]
  pub queue: QueueConfig,

  #[serde(default)]
  pub cache: CacheConfig,

  #[serde(default)]
  pub scheduler: SchedulerConfig,

  #[serde(default)]
  pub server: ServerConfig,

  #[serde(default)]
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load config from an explicit path, or from the user config with fallback to defaults.
  ///
  /// An explicit path must exist and parse. A broken user config is reported as an error
  /// too, since silently running with defaults would watch nothing.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    let config = match explicit {
      Some(path) => Self::from_file(path)?,
      None => {
        let path = Self::user_config_path();
        if path.exists() {
          Self::from_file(&path)?
        } else {
          Self::default()
        }
      }
    };
    config.validate()?;
    Ok(config)
  }

  /// Parse a config file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Check cross-field requirements.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.queue.backend == BackendKind::Remote && self.queue.url.is_none() {
      return Err(ConfigError::MissingUrl { section: "queue" });
    }
    if self.cache.backend == BackendKind::Remote && self.cache.url.is_none() {
      return Err(ConfigError::MissingUrl { section: "cache" });
    }
    Ok(())
  }

  /// Get the user-level config path
  pub fn user_config_path() -> PathBuf {
    crate::dirs::default_config_dir().join("config.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    r#"# docsync Configuration
# Place in ~/.config/docsync/config.toml or pass --config <path>

# ============================================================================
# File Watcher
# ============================================================================

[watcher]
# Root holding one directory per user: {personal_root}/{username}/...
# personal_root = "/srv/docs/users"

# Root holding one directory per shared space: {spaces_root}/{space}/...
# spaces_root = "/srv/docs/spaces"

# Quiet period before a change is published (milliseconds)
stability_ms = 2000

# Poll interval for the polling fallback backend (seconds)
poll_interval_secs = 2

# Publish add events for existing files at startup (primes a cold cache)
initial_scan = false

# Extra gitignore-style patterns to ignore
extra_ignores = []

# Access level attached to events of each space
# [watcher.space_access]
# handbook = "read"

# ============================================================================
# Processing Workers
# ============================================================================

[workers]
# Sleep when all priority queues are empty (milliseconds)
idle_poll_ms = 1000

# Sleep after a failed item or unreachable queue (milliseconds)
error_backoff_ms = 5000

# Attempts before a retryable failure is dead-lettered
max_attempts = 3

# Keep exhausted and malformed tasks on {concern}-dead-letter
dead_letter = true

# Files larger than this are reduced to a metadata stub (bytes)
max_content_bytes = 5242880  # 5MB

# ============================================================================
# Stores
# ============================================================================

[queue]
# Backend: memory or remote
backend = "memory"
# url = "http://127.0.0.1:7410"

# Queues kept in statistics
stats_capacity = 100

[cache]
# Backend: memory or remote
backend = "memory"
# url = "http://127.0.0.1:7410"

# ============================================================================
# Scheduler
# ============================================================================

[scheduler]
# Tick used for cron-style schedules (seconds)
cron_tick_secs = 60

# Delay before restarting a crashed critical task (seconds)
restart_backoff_secs = 5

# Tasks restarted automatically after a crash
critical_tasks = ["file-watcher"]

# Tasks kept in statistics
stats_capacity = 100

# ============================================================================
# HTTP Surface
# ============================================================================

[server]
bind = "127.0.0.1:7410"

# Readiness probe attempts before startup is aborted
status_retries = 10

# Delay between readiness probe attempts (milliseconds)
status_delay_ms = 500

# ============================================================================
# Daemon Lifecycle
# ============================================================================

[daemon]
# Log level: off, error, warn, info, debug, trace
log_level = "info"

# Log rotation: daily, hourly, never
log_rotation = "daily"

# Log retention in days (0 = keep forever)
log_retention_days = 7

# Time workers get to finish their current item on shutdown (seconds)
shutdown_grace_secs = 5
"#
    .to_string()
  }
}

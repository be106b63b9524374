//! Orchestrator - builds every component once and keeps the pipeline alive.
//!
//! # Lifecycle
//!
//! 1. Build the queue store, cache store and search index from config
//! 2. Register the task scripts and create the `Scheduler`
//! 3. Bind and serve the HTTP surface
//! 4. Wait until every `/{service}/status` probe answers (bounded retries)
//! 5. Schedule the watcher and the three processors as keep-alive tasks, plus
//!    daily log cleanup
//! 6. On ctrl-c: cancel the root token, give workers the grace period to finish
//!    their current item, then unschedule everything
//!
//! Tasks listed in `scheduler.critical_tasks` are rescheduled once after
//! `scheduler.restart_backoff_secs` when they report `error`.

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::{Arc, Weak},
  time::{Duration, SystemTime},
};

use serde_json::json;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  dirs,
  domain::config::{BackendKind, Config, ConfigError},
  exec::{
    Cadence, OnStatus, Schedule, Scheduler, SchedulerError, ScriptError, ScriptRegistry, StatusReport, TaskState,
    script_fn,
  },
  search::{MemorySearchIndex, SearchIndex},
  server::{SERVICES, Server, Services},
  store::{CacheBackend, CacheError, CacheStore, QueueError, QueueStore, fetch_status},
  watcher::FileWatcher,
  worker::{CacheProcessor, ContentProcessor, Processor, SearchProcessor, WorkerScript},
};

pub const FILE_WATCHER: &str = "file-watcher";
pub const CACHE_PROCESSOR: &str = "cache-processor";
pub const CONTENT_PROCESSOR: &str = "content-processor";
pub const SEARCH_PROCESSOR: &str = "search-processor";
pub const LOG_CLEANUP: &str = "log-cleanup";

/// Keep-alive cadence of long-running tasks. Ticks are skipped while they run.
const KEEP_ALIVE: Duration = Duration::from_secs(1);
const LOG_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Queue(#[from] QueueError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error(transparent)]
  Scheduler(#[from] SchedulerError),
  #[error("Failed to bind {addr}: {source}")]
  Bind {
    addr: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Service '{service}' at {url} not ready after {attempts} attempts: {reason}")]
  NotReady {
    service: String,
    url: String,
    attempts: u32,
    reason: String,
  },
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Directory holding rolling log files
  pub data_dir: PathBuf,
  /// Foreground mode logs to the console instead of files
  pub foreground: bool,
  pub config: Config,
}

impl RuntimeConfig {
  /// Load from `explicit`, or from the user config (written from the template on first run).
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if explicit.is_none() {
      Self::ensure_user_config();
    }
    Ok(Self {
      data_dir: dirs::default_data_dir(),
      foreground: false,
      config: Config::load(explicit)?,
    })
  }

  fn ensure_user_config() {
    let path = Config::user_config_path();
    if path.exists() {
      return;
    }

    if let Some(parent) = path.parent()
      && let Err(e) = std::fs::create_dir_all(parent)
    {
      warn!("Failed to create config directory: {}", e);
      return;
    }

    match std::fs::write(&path, Config::generate_template()) {
      Ok(()) => info!("Created user config: {:?}", path),
      Err(e) => warn!("Failed to create user config: {}", e),
    }
  }
}

// ============================================================================
// Daemon
// ============================================================================

pub struct Daemon {
  runtime_config: RuntimeConfig,
}

/// A started pipeline. Dropping it does not stop anything; call `shutdown`.
pub struct RunningDaemon {
  pub addr: SocketAddr,
  pub services: Services,
  cancel: CancellationToken,
  server: JoinHandle<std::io::Result<()>>,
  grace: Duration,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c, then shut down gracefully.
  pub async fn run(self) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();
    let running = self.start(cancel.clone()).await?;

    tokio::select! {
      result = signal::ctrl_c() => match result {
        Ok(()) => info!("Received ctrl-c, shutting down..."),
        Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
      },
      _ = cancel.cancelled() => {}
    }

    running.shutdown().await;
    info!("Daemon shutdown complete");
    Ok(())
  }

  /// Build, serve, wait for readiness and schedule the pipeline.
  pub async fn start(&self, cancel: CancellationToken) -> Result<RunningDaemon, DaemonError> {
    let config = &self.runtime_config.config;
    info!("Starting docsync daemon");
    info!("Data dir: {:?}", self.runtime_config.data_dir);

    let queue = <dyn QueueStore>::from_config(&config.queue)?;
    let cache = Arc::new(CacheStore::new(<dyn CacheBackend>::from_config(&config.cache)?));
    let search = MemorySearchIndex::shared();
    info!(queue = queue.name(), cache = cache.backend_name(), search = search.name(), "Stores ready");

    let registry = Arc::new(self.scripts(queue.clone(), cache.clone(), search.clone()));
    debug!(scripts = ?registry.names(), "Scripts registered");
    let scheduler = Arc::new(Scheduler::new(registry, config.scheduler.clone(), cancel.child_token()));

    let services = Services {
      queue,
      cache,
      scheduler: scheduler.clone(),
      search,
    };

    let listener = TcpListener::bind(&config.server.bind)
      .await
      .map_err(|source| DaemonError::Bind {
        addr: config.server.bind.clone(),
        source,
      })?;
    let addr = listener.local_addr().map_err(|source| DaemonError::Bind {
      addr: config.server.bind.clone(),
      source,
    })?;

    let server = {
      let server = Server::new(services.clone());
      let cancel = cancel.child_token();
      tokio::spawn(async move { server.run(listener, cancel).await })
    };

    let running = RunningDaemon {
      addr,
      services,
      cancel: cancel.clone(),
      server,
      grace: Duration::from_secs(config.daemon.shutdown_grace_secs),
    };

    if let Err(e) = self.wait_ready(&running.base_url()).await {
      error!(error = %e, "Startup health check failed");
      running.shutdown().await;
      return Err(e);
    }

    if let Err(e) = self.schedule_pipeline(&scheduler, &cancel) {
      running.shutdown().await;
      return Err(e);
    }

    info!(%addr, "Daemon ready");
    Ok(running)
  }

  fn scripts(&self, queue: Arc<dyn QueueStore>, cache: Arc<CacheStore>, search: Arc<dyn SearchIndex>) -> ScriptRegistry {
    let config = &self.runtime_config.config;
    let mut registry = ScriptRegistry::new();

    let watcher_config = config.watcher.clone();
    let watcher_queue = queue.clone();
    registry.register(
      FILE_WATCHER,
      script_fn(move |_, cancel| {
        let config = watcher_config.clone();
        let queue = watcher_queue.clone();
        async move {
          let watcher = FileWatcher::new(&config, queue, cancel).map_err(ScriptError::new)?;
          let stats = watcher.run().await;
          serde_json::to_value(stats).map_err(ScriptError::new)
        }
      }),
    );

    let processors: [(&str, Arc<dyn Processor>); 3] = [
      (CACHE_PROCESSOR, Arc::new(CacheProcessor::new(cache))),
      (
        CONTENT_PROCESSOR,
        Arc::new(ContentProcessor::new(queue.clone(), config.workers.max_content_bytes)),
      ),
      (SEARCH_PROCESSOR, Arc::new(SearchProcessor::new(search))),
    ];
    for (name, processor) in processors {
      registry.register(
        name,
        Arc::new(WorkerScript::new(processor, queue.clone(), config.workers.clone())),
      );
    }

    let data_dir = self.runtime_config.data_dir.clone();
    let retention_days = config.daemon.log_retention_days;
    registry.register(
      LOG_CLEANUP,
      script_fn(move |_, _| {
        let data_dir = data_dir.clone();
        async move {
          let deleted = cleanup_old_logs(&data_dir, retention_days);
          if deleted > 0 {
            info!("Cleaned up {} old log files", deleted);
          }
          Ok(json!({ "deleted": deleted }))
        }
      }),
    );

    registry
  }

  /// Poll every local service, then the remote backends, until each answers.
  async fn wait_ready(&self, base_url: &str) -> Result<(), DaemonError> {
    let config = &self.runtime_config.config;
    let mut probes: Vec<(&str, String)> = SERVICES.iter().map(|s| (*s, base_url.to_string())).collect();
    if config.queue.backend == BackendKind::Remote
      && let Some(url) = &config.queue.url
    {
      probes.push(("queue", url.clone()));
    }
    if config.cache.backend == BackendKind::Remote
      && let Some(url) = &config.cache.url
    {
      probes.push(("cache", url.clone()));
    }

    let client = reqwest::Client::new();
    let attempts = config.server.status_retries.max(1);
    for (service, url) in probes {
      let mut attempt = 0;
      loop {
        attempt += 1;
        match fetch_status(&client, &url, service).await {
          Ok(body) => {
            debug!(service, url = %url, body = %body, "Service ready");
            break;
          }
          Err(e) if attempt >= attempts => {
            return Err(DaemonError::NotReady {
              service: service.to_string(),
              url,
              attempts,
              reason: e.to_string(),
            });
          }
          Err(e) => {
            debug!(service, attempt, error = %e, "Service not ready yet");
            tokio::time::sleep(config.server.status_delay()).await;
          }
        }
      }
    }
    Ok(())
  }

  fn schedule_pipeline(&self, scheduler: &Arc<Scheduler>, cancel: &CancellationToken) -> Result<(), DaemonError> {
    let watcher = &self.runtime_config.config.watcher;
    if watcher.personal_root.is_some() || watcher.spaces_root.is_some() {
      scheduler.start(supervised(scheduler, FILE_WATCHER, Cadence::Interval(KEEP_ALIVE), cancel))?;
    } else {
      warn!("No watcher roots configured; file watcher disabled");
    }

    for task in [CACHE_PROCESSOR, CONTENT_PROCESSOR, SEARCH_PROCESSOR] {
      scheduler.start(supervised(scheduler, task, Cadence::Interval(KEEP_ALIVE), cancel))?;
    }

    // Runs once now, then daily
    scheduler.start(supervised(
      scheduler,
      LOG_CLEANUP,
      Cadence::Interval(LOG_CLEANUP_INTERVAL),
      cancel,
    ))?;
    Ok(())
  }
}

impl RunningDaemon {
  pub fn base_url(&self) -> String {
    format!("http://{}", self.addr)
  }

  /// Cooperative stop: workers finish their current item within the grace
  /// period, then every task is unscheduled and the server drained.
  pub async fn shutdown(self) {
    info!("Shutting down...");
    self.cancel.cancel();

    let scheduler = &self.services.scheduler;
    let idle = async {
      while scheduler.list().iter().any(|t| t.state == TaskState::Running) {
        tokio::time::sleep(Duration::from_millis(50)).await;
      }
    };
    if tokio::time::timeout(self.grace, idle).await.is_err() {
      warn!(grace_secs = self.grace.as_secs(), "Tasks still running after grace period, stopping");
    }

    if let Err(e) = scheduler.stop(None) {
      warn!("Failed to unschedule tasks: {}", e);
    }

    match self.server.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!("Server error: {}", e),
      Err(e) => warn!("Server task failed: {}", e),
    }
  }
}

// ============================================================================
// Supervision
// ============================================================================

/// A keep-alive schedule whose errors are logged and, for critical tasks,
/// answered with one delayed reschedule.
fn supervised(scheduler: &Arc<Scheduler>, task: &str, cadence: Cadence, cancel: &CancellationToken) -> Schedule {
  let on_status = restart_on_error(Arc::downgrade(scheduler), task, cadence.clone(), cancel.clone());
  Schedule::new(task, cadence).on_status(on_status)
}

fn restart_on_error(scheduler: Weak<Scheduler>, task: &str, cadence: Cadence, cancel: CancellationToken) -> OnStatus {
  let task = task.to_string();
  Arc::new(move |report: StatusReport| {
    let message = match (&report.state, &report.outcome) {
      (TaskState::Error, Err(message)) => message.clone(),
      _ => {
        debug!(task = %report.task, state = ?report.state, "Task finished");
        return;
      }
    };
    error!(task = %task, error = %message, "Task failed");

    let Some(strong) = scheduler.upgrade() else {
      return;
    };
    if !strong.config().is_critical(&task) {
      return;
    }

    let backoff = strong.config().restart_backoff();
    drop(strong);
    warn!(task = %task, backoff_secs = backoff.as_secs(), "Critical task failed, restart scheduled");

    let scheduler = scheduler.clone();
    let task = task.clone();
    let cadence = cadence.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(backoff) => {}
      }
      let Some(scheduler) = scheduler.upgrade() else {
        return;
      };
      match scheduler.start(supervised(&scheduler, &task, cadence, &cancel)) {
        Ok(()) => info!(task = %task, "Critical task restarted"),
        Err(e) => warn!(task = %task, error = %e, "Failed to restart critical task"),
      }
    });
  })
}

// ============================================================================
// Log cleanup
// ============================================================================

/// Delete rolling log files in `data_dir` older than the retention period.
pub fn cleanup_old_logs(data_dir: &Path, retention_days: u64) -> usize {
  if retention_days == 0 {
    return 0;
  }

  let retention = Duration::from_secs(retention_days * 24 * 3600);
  let now = SystemTime::now();
  let mut deleted = 0;

  let entries = match std::fs::read_dir(data_dir) {
    Ok(e) => e,
    Err(e) => {
      debug!("Failed to read log directory {:?}: {}", data_dir, e);
      return 0;
    }
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if path.is_dir() {
      continue;
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    if !dirs::is_log_file(file_name) {
      continue;
    }

    let Some(age) = entry
      .metadata()
      .and_then(|m| m.modified())
      .ok()
      .and_then(|modified| now.duration_since(modified).ok())
    else {
      continue;
    };

    if age > retention {
      if let Err(e) = std::fs::remove_file(&path) {
        warn!("Failed to delete old log file {:?}: {}", path, e);
      } else {
        debug!("Deleted old log file: {:?}", path);
        deleted += 1;
      }
    }
  }

  deleted
}

#[cfg(test)]
mod tests {
  use std::{
    fs::{File, FileTimes},
    sync::atomic::{AtomicUsize, Ordering},
  };

  use serde_json::Value;
  use tempfile::TempDir;

  use super::*;
  use crate::domain::config::SchedulerConfig;

  fn age_file(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 24 * 3600);
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_modified(when)).unwrap();
  }

  #[test]
  fn test_cleanup_old_logs() {
    let temp = TempDir::new().unwrap();
    let old = temp.path().join("docsync.log.2020-01-01");
    let fresh = temp.path().join("docsync.log.2099-01-01");
    let unrelated = temp.path().join("notes.txt");
    for path in [&old, &fresh, &unrelated] {
      std::fs::write(path, "x").unwrap();
    }
    age_file(&old, 30);
    age_file(&unrelated, 30);

    assert_eq!(cleanup_old_logs(temp.path(), 7), 1);
    assert!(!old.exists());
    assert!(fresh.exists());
    assert!(unrelated.exists());
  }

  #[test]
  fn test_cleanup_disabled_with_zero_retention() {
    let temp = TempDir::new().unwrap();
    let old = temp.path().join("docsync.log");
    std::fs::write(&old, "x").unwrap();
    age_file(&old, 30);

    assert_eq!(cleanup_old_logs(temp.path(), 0), 0);
    assert!(old.exists());
  }

  #[test]
  fn test_cleanup_missing_dir() {
    assert_eq!(cleanup_old_logs(Path::new("/nonexistent/docsync"), 7), 0);
  }

  #[tokio::test]
  async fn test_critical_task_restarted_once_after_error() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut registry = ScriptRegistry::new();
    let counter = runs.clone();
    registry.register(
      FILE_WATCHER,
      script_fn(move |_, cancel| {
        let counter = counter.clone();
        async move {
          if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ScriptError::new("watch limit reached"));
          }
          cancel.cancelled().await;
          Ok(Value::Null)
        }
      }),
    );
    registry.register("flaky", script_fn(|_, _| async { Err(ScriptError::new("nope")) }));

    let config = SchedulerConfig {
      restart_backoff_secs: 1,
      ..SchedulerConfig::default()
    };
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(Arc::new(registry), config, cancel.child_token()));
    let hourly = Cadence::every_secs(3600);
    scheduler
      .start(supervised(&scheduler, FILE_WATCHER, hourly.clone(), &cancel))
      .unwrap();
    scheduler.start(supervised(&scheduler, "flaky", hourly, &cancel)).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!scheduler.is_scheduled(FILE_WATCHER));
    assert!(!scheduler.is_scheduled("flaky"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(scheduler.is_scheduled(FILE_WATCHER));
    assert_eq!(scheduler.status(FILE_WATCHER), Some(TaskState::Running));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(!scheduler.is_scheduled("flaky"), "non-critical tasks stay down");

    cancel.cancel();
  }

  #[tokio::test]
  async fn test_startup_fails_when_remote_store_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.server.status_retries = 2;
    config.server.status_delay_ms = 10;
    config.queue.backend = BackendKind::Remote;
    config.queue.url = Some(dead.clone());

    let data_dir = TempDir::new().unwrap();
    let daemon = Daemon::new(RuntimeConfig {
      data_dir: data_dir.path().to_path_buf(),
      foreground: true,
      config,
    });

    let err = daemon.start(CancellationToken::new()).await.err().unwrap();
    match err {
      DaemonError::NotReady {
        service, url, attempts, ..
      } => {
        assert_eq!(service, "queue");
        assert_eq!(url, dead);
        assert_eq!(attempts, 2);
      }
      other => panic!("unexpected error: {}", other),
    }
  }
}

//! Test helpers for pipeline integration tests.
//!
//! `PipelineContext` starts a complete daemon (watcher, processors, HTTP
//! surface) over a temporary content tree with short timings.

use std::{
  future::Future,
  path::PathBuf,
  time::{Duration, Instant},
};

use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
  config::Config,
  daemon::{Daemon, FILE_WATCHER, RunningDaemon, RuntimeConfig},
  exec::TaskState,
  search::SearchQuery,
};

/// Config with millisecond-scale timings and an ephemeral port.
pub fn fast_config() -> Config {
  let mut config = Config::default();
  config.watcher.stability_ms = 200;
  config.workers.idle_poll_ms = 20;
  config.workers.error_backoff_ms = 50;
  config.server.bind = "127.0.0.1:0".to_string();
  config.server.status_delay_ms = 50;
  config.daemon.shutdown_grace_secs = 2;
  config
}

pub struct PipelineContext {
  /// Personal root: `{root}/{username}/...`
  pub root: TempDir,
  pub _data_dir: TempDir,
  pub daemon: RunningDaemon,
}

impl PipelineContext {
  pub async fn start() -> Self {
    let root = TempDir::new().expect("create root temp dir");
    let data_dir = TempDir::new().expect("create data temp dir");
    std::fs::create_dir_all(root.path().join("alice/notes")).expect("create user dir");

    let mut config = fast_config();
    config.watcher.personal_root = Some(root.path().to_path_buf());

    let runtime = RuntimeConfig {
      data_dir: data_dir.path().to_path_buf(),
      foreground: true,
      config,
    };
    let daemon = Daemon::new(runtime)
      .start(CancellationToken::new())
      .await
      .expect("daemon should start");

    let ctx = Self {
      root,
      _data_dir: data_dir,
      daemon,
    };

    let scheduler = ctx.daemon.services.scheduler.clone();
    assert!(
      eventually(Duration::from_secs(5), || {
        let scheduler = scheduler.clone();
        async move { scheduler.status(FILE_WATCHER) == Some(TaskState::Running) }
      })
      .await,
      "file watcher should be running"
    );
    // Let notify finish registering its watches
    tokio::time::sleep(Duration::from_millis(300)).await;
    ctx
  }

  /// Absolute path of `rel` inside alice's personal tree.
  pub fn alice(&self, rel: &str) -> PathBuf {
    self.root.path().join("alice").join(rel)
  }

  pub async fn cached(&self, key: &str) -> Option<Value> {
    self.daemon.services.cache.get(key).await.expect("cache get")
  }

  /// Search ids matching `text`.
  pub async fn search_ids(&self, text: &str) -> Vec<String> {
    self
      .daemon
      .services
      .search
      .search(&SearchQuery::new(text))
      .await
      .expect("search")
      .into_iter()
      .map(|hit| hit.id)
      .collect()
  }

  pub async fn shutdown(self) {
    self.daemon.shutdown().await;
  }
}

/// Poll `check` every 50ms until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  let deadline = Instant::now() + timeout;
  loop {
    if check().await {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
}

//! Task Execution Engine - runs one task script at a time in an isolated context.
//!
//! States: `idle -> running -> {completed, error} -> idle`.
//!
//! Each run is spawned as its own tokio task, so a panicking script cannot take
//! the engine down: the panic surfaces as a `JoinError` and is reported as an
//! `error` status with a synthetic message. `on_status` is invoked exactly once
//! per run that ends on its own; runs terminated by `stop()` report nothing.

use std::{
  any::Any,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::script::TaskScript;
use crate::store::stats::{ActivityLog, TaskStats};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("Task '{0}' is already running")]
  AlreadyRunning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
  Idle,
  Running,
  Completed,
  Error,
}

/// Terminal report delivered to `on_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
  pub task: String,
  /// `Completed` or `Error`
  pub state: TaskState,
  /// Script result on completion, error message on failure
  pub outcome: Result<Value, String>,
}

pub type OnStatus = Arc<dyn Fn(StatusReport) + Send + Sync>;

// ============================================================================
// Run statistics
// ============================================================================

/// Per-task run statistics shared by every engine of a scheduler.
#[derive(Clone)]
pub struct RunStats {
  log: Arc<Mutex<ActivityLog<TaskStats>>>,
}

impl RunStats {
  pub fn new(capacity: usize) -> Self {
    Self {
      log: Arc::new(Mutex::new(ActivityLog::new(capacity))),
    }
  }

  fn lock(&self) -> MutexGuard<'_, ActivityLog<TaskStats>> {
    self.log.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn started(&self, task: &str) {
    self.lock().touch(task, TaskStats::new, |s| {
      s.executions += 1;
      s.last_start = Some(Utc::now());
    });
  }

  pub fn ended(&self, task: &str) {
    self.lock().touch(task, TaskStats::new, |s| s.last_end = Some(Utc::now()));
  }

  pub fn next_run(&self, task: &str, at: DateTime<Utc>) {
    self.lock().touch(task, TaskStats::new, |s| s.next_run = Some(at));
  }

  pub fn get(&self, task: &str) -> Option<TaskStats> {
    self.lock().get(task).cloned()
  }

  /// Most recently active first.
  pub fn snapshot(&self) -> Vec<(String, TaskStats)> {
    self
      .lock()
      .iter_recent()
      .map(|(task, stats)| (task.to_string(), stats.clone()))
      .collect()
  }
}

impl Default for RunStats {
  fn default() -> Self {
    Self::new(100)
  }
}

// ============================================================================
// TaskEngine
// ============================================================================

struct Running {
  cancel: CancellationToken,
  abort: AbortHandle,
}

struct EngineState {
  state: TaskState,
  /// Bumped on every start and stop so a stale supervisor never touches a newer run
  generation: u64,
  running: Option<Running>,
}

pub struct TaskEngine {
  task: String,
  state: Arc<Mutex<EngineState>>,
  stats: RunStats,
  /// Parent of every run's cancellation token (cooperative shutdown)
  parent: CancellationToken,
}

impl TaskEngine {
  pub fn new(task: impl Into<String>, stats: RunStats, parent: CancellationToken) -> Self {
    Self {
      task: task.into(),
      state: Arc::new(Mutex::new(EngineState {
        state: TaskState::Idle,
        generation: 0,
        running: None,
      })),
      stats,
      parent,
    }
  }

  pub fn task(&self) -> &str {
    &self.task
  }

  pub fn status(&self) -> TaskState {
    lock(&self.state).state
  }

  pub fn is_running(&self) -> bool {
    self.status() == TaskState::Running
  }

  /// Start `script` with `data`. Fails fast if a run is already in progress.
  pub fn start(
    &self,
    script: Arc<dyn TaskScript>,
    data: Value,
    on_status: Option<OnStatus>,
  ) -> Result<(), EngineError> {
    let mut state = lock(&self.state);
    if state.state == TaskState::Running {
      return Err(EngineError::AlreadyRunning(self.task.clone()));
    }

    state.generation += 1;
    let generation = state.generation;
    let cancel = self.parent.child_token();

    let run = tokio::spawn({
      let cancel = cancel.clone();
      async move { script.run(data, cancel).await }
    });

    state.running = Some(Running {
      cancel,
      abort: run.abort_handle(),
    });
    state.state = TaskState::Running;
    drop(state);

    self.stats.started(&self.task);
    debug!(task = %self.task, generation, "Task started");

    let task = self.task.clone();
    let shared = self.state.clone();
    let stats = self.stats.clone();

    tokio::spawn(async move {
      let outcome = match run.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.0),
        Err(e) if e.is_cancelled() => return,
        Err(e) => {
          let reason = e.try_into_panic().map(panic_message).unwrap_or_else(|e| e.to_string());
          Err(format!("Task '{}' exited abnormally: {}", task, reason))
        }
      };

      let terminal = if outcome.is_ok() {
        TaskState::Completed
      } else {
        TaskState::Error
      };

      {
        let mut state = lock(&shared);
        if state.generation != generation || state.running.is_none() {
          return;
        }
        state.running = None;
        state.state = terminal;
      }

      stats.ended(&task);
      match &outcome {
        Ok(_) => info!(task = %task, "Task completed"),
        Err(message) => warn!(task = %task, error = %message, "Task failed"),
      }

      if let Some(on_status) = on_status {
        on_status(StatusReport {
          task: task.clone(),
          state: terminal,
          outcome,
        });
      }

      let mut state = lock(&shared);
      if state.generation == generation && state.state == terminal {
        state.state = TaskState::Idle;
      }
    });

    Ok(())
  }

  /// Terminate the current run unconditionally and return to idle.
  ///
  /// Returns whether a run was terminated. No status is reported for it.
  pub fn stop(&self) -> bool {
    let mut state = lock(&self.state);
    state.generation += 1;
    state.state = TaskState::Idle;
    let Some(running) = state.running.take() else {
      return false;
    };
    drop(state);

    running.cancel.cancel();
    running.abort.abort();
    self.stats.ended(&self.task);
    info!(task = %self.task, "Task stopped");
    true
  }
}

impl Drop for TaskEngine {
  fn drop(&mut self) {
    self.stop();
  }
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;
  use tokio::sync::mpsc;

  use super::*;
  use crate::exec::script::{ScriptError, script_fn};

  fn engine(task: &str) -> TaskEngine {
    TaskEngine::new(task, RunStats::default(), CancellationToken::new())
  }

  fn channel_callback() -> (OnStatus, mpsc::UnboundedReceiver<StatusReport>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: OnStatus = Arc::new(move |report| {
      let _ = tx.send(report);
    });
    (cb, rx)
  }

  async fn wait_idle(engine: &TaskEngine) {
    for _ in 0..100 {
      if engine.status() == TaskState::Idle {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never returned to idle");
  }

  #[tokio::test]
  async fn test_completed_reports_result_once() {
    let engine = engine("echo");
    let (cb, mut rx) = channel_callback();
    let script = script_fn(|data, _| async move { Ok(json!({ "got": data })) });

    engine.start(script, json!(7), Some(cb)).unwrap();
    let report = rx.recv().await.unwrap();
    assert_eq!(report.task, "echo");
    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.outcome, Ok(json!({ "got": 7 })));

    wait_idle(&engine).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_script_error_is_reported() {
    let engine = engine("failing");
    let (cb, mut rx) = channel_callback();
    let script = script_fn(|_, _| async { Err(ScriptError::new("disk on fire")) });

    engine.start(script, Value::Null, Some(cb)).unwrap();
    let report = rx.recv().await.unwrap();
    assert_eq!(report.state, TaskState::Error);
    assert_eq!(report.outcome, Err("disk on fire".to_string()));
  }

  #[tokio::test]
  async fn test_panic_is_reported_as_error() {
    let engine = engine("crashy");
    let (cb, mut rx) = channel_callback();
    let script = script_fn(|_, _| async {
      if true {
        panic!("boom");
      }
      Ok(Value::Null)
    });

    engine.start(script, Value::Null, Some(cb)).unwrap();
    let report = rx.recv().await.unwrap();
    assert_eq!(report.state, TaskState::Error);
    let message = report.outcome.unwrap_err();
    assert!(message.contains("exited abnormally"), "{message}");
    assert!(message.contains("boom"), "{message}");

    // The engine survives and can run again
    wait_idle(&engine).await;
    engine
      .start(script_fn(|_, _| async { Ok(Value::Null) }), Value::Null, None)
      .unwrap();
  }

  #[tokio::test]
  async fn test_start_while_running_fails_fast() {
    let engine = engine("long");
    let script = script_fn(|_, cancel: CancellationToken| async move {
      cancel.cancelled().await;
      Ok(Value::Null)
    });

    engine.start(script.clone(), Value::Null, None).unwrap();
    assert_eq!(engine.status(), TaskState::Running);
    assert!(matches!(
      engine.start(script, Value::Null, None),
      Err(EngineError::AlreadyRunning(task)) if task == "long"
    ));
  }

  #[tokio::test]
  async fn test_stop_returns_to_idle_without_callback() {
    let engine = engine("forever");
    let (cb, mut rx) = channel_callback();
    let script = script_fn(|_, _| async {
      std::future::pending::<()>().await;
      Ok(Value::Null)
    });

    engine.start(script, Value::Null, Some(cb)).unwrap();
    assert!(engine.stop());
    assert_eq!(engine.status(), TaskState::Idle);
    assert!(!engine.stop());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_parent_cancellation_is_cooperative() {
    let parent = CancellationToken::new();
    let engine = TaskEngine::new("worker", RunStats::default(), parent.clone());
    let (cb, mut rx) = channel_callback();
    let script = script_fn(|_, cancel: CancellationToken| async move {
      cancel.cancelled().await;
      Ok(json!("drained"))
    });

    engine.start(script, Value::Null, Some(cb)).unwrap();
    parent.cancel();
    let report = rx.recv().await.unwrap();
    assert_eq!(report.outcome, Ok(json!("drained")));
  }

  #[tokio::test]
  async fn test_stats_track_runs() {
    let stats = RunStats::default();
    let engine = TaskEngine::new("counted", stats.clone(), CancellationToken::new());
    let (cb, mut rx) = channel_callback();

    for _ in 0..2 {
      engine
        .start(script_fn(|_, _| async { Ok(Value::Null) }), Value::Null, Some(cb.clone()))
        .unwrap();
      rx.recv().await.unwrap();
      wait_idle(&engine).await;
    }

    let record = stats.get("counted").unwrap();
    assert_eq!(record.executions, 2);
    assert!(record.last_start.is_some());
    assert!(record.last_end.is_some());
  }
}

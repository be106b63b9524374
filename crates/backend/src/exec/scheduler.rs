//! Scheduler - keeps named tasks alive on an interval or cron-like cadence.
//!
//! Every scheduled task owns a `TaskEngine` and a timer. On each tick the timer
//! starts the task's script unless a run is still in progress, so a
//! long-running worker scheduled every second is simply kept alive.
//!
//! A run that reports `error` unschedules its task: the scheduler never
//! restarts failures on its own. Whoever supplied `on_status` decides whether
//! to schedule it again.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
  engine::{OnStatus, RunStats, StatusReport, TaskEngine, TaskState},
  script::ScriptRegistry,
};
use crate::{domain::config::SchedulerConfig, store::stats::TaskStats};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  #[error("Task '{0}' is already scheduled")]
  AlreadyScheduled(String),
  #[error("Task '{0}' is not scheduled")]
  NotScheduled(String),
  #[error("Unknown script '{0}'")]
  UnknownScript(String),
  #[error("Invalid cron expression '{0}'")]
  InvalidCron(String),
  #[error("Interval must be greater than zero")]
  ZeroInterval,
}

/// How often a task is (re)started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cadence {
  /// Run immediately, then every N seconds
  #[serde(rename = "intervalSeconds", with = "duration_secs")]
  Interval(Duration),
  /// Cron-like expression, approximated by the scheduler's cron tick
  Cron(String),
}

mod duration_secs {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_secs(u64::deserialize(d)?))
  }
}

impl Cadence {
  pub fn every_secs(secs: u64) -> Self {
    Cadence::Interval(Duration::from_secs(secs))
  }

  fn validate(&self) -> Result<(), SchedulerError> {
    match self {
      Cadence::Interval(d) if d.is_zero() => Err(SchedulerError::ZeroInterval),
      Cadence::Interval(_) => Ok(()),
      Cadence::Cron(expr) => {
        let fields = expr.split_whitespace().count();
        if (5..=6).contains(&fields) {
          Ok(())
        } else {
          Err(SchedulerError::InvalidCron(expr.clone()))
        }
      }
    }
  }
}

/// A request to keep a task alive.
pub struct Schedule {
  pub task: String,
  pub cadence: Cadence,
  /// Script to run; defaults to the task name
  pub script: Option<String>,
  pub data: Value,
  pub on_status: Option<OnStatus>,
}

impl Schedule {
  pub fn new(task: impl Into<String>, cadence: Cadence) -> Self {
    Self {
      task: task.into(),
      cadence,
      script: None,
      data: Value::Null,
      on_status: None,
    }
  }

  pub fn every(task: impl Into<String>, period: Duration) -> Self {
    Self::new(task, Cadence::Interval(period))
  }

  pub fn cron(task: impl Into<String>, expr: impl Into<String>) -> Self {
    Self::new(task, Cadence::Cron(expr.into()))
  }

  pub fn script(mut self, name: impl Into<String>) -> Self {
    self.script = Some(name.into());
    self
  }

  pub fn data(mut self, data: Value) -> Self {
    self.data = data;
    self
  }

  pub fn on_status(mut self, on_status: OnStatus) -> Self {
    self.on_status = Some(on_status);
    self
  }
}

/// Listing entry for `GET /scheduler/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskInfo {
  pub task: String,
  pub script: String,
  pub cadence: Cadence,
  pub state: TaskState,
  pub stats: Option<TaskStats>,
}

struct ScheduledTask {
  id: u64,
  script: String,
  cadence: Cadence,
  engine: Arc<TaskEngine>,
  timer: CancellationToken,
}

impl ScheduledTask {
  fn shutdown(&self) {
    self.timer.cancel();
    self.engine.stop();
  }
}

pub struct Scheduler {
  registry: Arc<ScriptRegistry>,
  config: SchedulerConfig,
  stats: RunStats,
  tasks: Arc<DashMap<String, ScheduledTask>>,
  next_id: AtomicU64,
  /// Parent of every run's cancellation token
  cancel: CancellationToken,
}

impl Scheduler {
  pub fn new(registry: Arc<ScriptRegistry>, config: SchedulerConfig, cancel: CancellationToken) -> Self {
    let stats = RunStats::new(config.stats_capacity);
    Self {
      registry,
      config,
      stats,
      tasks: Arc::new(DashMap::new()),
      next_id: AtomicU64::new(0),
      cancel,
    }
  }

  pub fn registry(&self) -> &ScriptRegistry {
    &self.registry
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  /// Register `schedule` and start its timer. Rejects names already scheduled.
  pub fn start(&self, schedule: Schedule) -> Result<(), SchedulerError> {
    schedule.cadence.validate()?;

    let script_name = schedule.script.unwrap_or_else(|| schedule.task.clone());
    let script = self
      .registry
      .get(&script_name)
      .ok_or_else(|| SchedulerError::UnknownScript(script_name.clone()))?;

    let task = schedule.task;
    let entry = match self.tasks.entry(task.clone()) {
      dashmap::mapref::entry::Entry::Occupied(_) => return Err(SchedulerError::AlreadyScheduled(task)),
      dashmap::mapref::entry::Entry::Vacant(entry) => entry,
    };

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let engine = Arc::new(TaskEngine::new(task.clone(), self.stats.clone(), self.cancel.child_token()));
    let timer = self.cancel.child_token();
    let on_status = self.wrap_on_status(&task, id, schedule.on_status);

    let (period, run_immediately) = match &schedule.cadence {
      Cadence::Interval(period) => (*period, true),
      Cadence::Cron(_) => (self.config.cron_tick(), false),
    };

    entry.insert(ScheduledTask {
      id,
      script: script_name.clone(),
      cadence: schedule.cadence.clone(),
      engine: engine.clone(),
      timer: timer.clone(),
    });

    info!(task = %task, script = %script_name, cadence = ?schedule.cadence, "Task scheduled");

    let stats = self.stats.clone();
    let data = schedule.data;
    tokio::spawn(async move {
      let mut ticker = interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      if !run_immediately {
        ticker.tick().await;
      }

      loop {
        tokio::select! {
          biased;

          _ = timer.cancelled() => {
            trace!(task = %task, "Timer stopped");
            break;
          }

          _ = ticker.tick() => {
            stats.next_run(&task, Utc::now() + TimeDelta::from_std(period).unwrap_or(TimeDelta::zero()));

            // Not idle: still running, or its status is being delivered
            if engine.status() != TaskState::Idle {
              trace!(task = %task, "Still running, skipping tick");
              continue;
            }
            if let Err(e) = engine.start(script.clone(), data.clone(), Some(on_status.clone())) {
              debug!(task = %task, error = %e, "Tick skipped");
            }
          }
        }
      }
    });

    Ok(())
  }

  /// Unschedule one task or, with `None`, every task. Statistics are kept.
  pub fn stop(&self, task: Option<&str>) -> Result<(), SchedulerError> {
    match task {
      Some(name) => {
        let (_, scheduled) = self
          .tasks
          .remove(name)
          .ok_or_else(|| SchedulerError::NotScheduled(name.to_string()))?;
        scheduled.shutdown();
        info!(task = %name, "Task unscheduled");
      }
      None => {
        let names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for name in names {
          if let Some((_, scheduled)) = self.tasks.remove(&name) {
            scheduled.shutdown();
          }
        }
        info!("All tasks unscheduled");
      }
    }
    Ok(())
  }

  /// Alias of [`Scheduler::stop`].
  pub fn cancel(&self, task: Option<&str>) -> Result<(), SchedulerError> {
    self.stop(task)
  }

  pub fn is_scheduled(&self, task: &str) -> bool {
    self.tasks.contains_key(task)
  }

  pub fn status(&self, task: &str) -> Option<TaskState> {
    self.tasks.get(task).map(|t| t.engine.status())
  }

  pub fn stats(&self, task: &str) -> Option<TaskStats> {
    self.stats.get(task)
  }

  /// Scheduled tasks sorted by name.
  pub fn list(&self) -> Vec<ScheduledTaskInfo> {
    let mut tasks: Vec<ScheduledTaskInfo> = self
      .tasks
      .iter()
      .map(|entry| ScheduledTaskInfo {
        task: entry.key().clone(),
        script: entry.script.clone(),
        cadence: entry.cadence.clone(),
        state: entry.engine.status(),
        stats: self.stats.get(entry.key()),
      })
      .collect();
    tasks.sort_by(|a, b| a.task.cmp(&b.task));
    tasks
  }

  /// Statistics of every task that has run, including unscheduled ones.
  pub fn history(&self) -> Vec<(String, TaskStats)> {
    self.stats.snapshot()
  }

  /// On `error`, drop the schedule (if it is still the one that failed) before
  /// handing the report to the caller's callback.
  fn wrap_on_status(&self, task: &str, id: u64, user: Option<OnStatus>) -> OnStatus {
    let tasks = self.tasks.clone();
    let task = task.to_string();
    Arc::new(move |report: StatusReport| {
      if report.state == TaskState::Error
        && let Some((_, scheduled)) = tasks.remove_if(&task, |_, t| t.id == id)
      {
        scheduled.timer.cancel();
        warn!(task = %task, "Task unscheduled after error");
      }
      if let Some(user) = &user {
        user(report);
      }
    })
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    for entry in self.tasks.iter() {
      entry.timer.cancel();
    }
  }
}

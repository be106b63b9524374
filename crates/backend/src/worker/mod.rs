//! Processing workers.
//!
//! A `Worker` drains one concern's three priority queues in strict order and
//! hands each item to its `Processor`. Siblings share nothing but the stores.
//!
//! Polling discipline:
//! - dequeue `{concern}-high`, `-medium`, `-low` in that order
//! - the first non-empty result is processed and the loop polls again at once
//! - all empty: sleep `workers.idle_poll_ms`
//! - failed item or unreachable queue: sleep `workers.error_backoff_ms`
//!
//! Failed items are retried at the tail of their queue up to
//! `workers.max_attempts`, then moved to `{concern}-dead-letter`.

mod cache;
mod content;
pub mod extract;
mod search;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub use self::{cache::CacheProcessor, content::ContentProcessor, search::SearchProcessor};
use crate::{
  domain::{config::WorkersConfig, keys::Concern, task::TaskError},
  exec::{ScriptError, TaskScript},
  search::SearchError,
  store::{CacheError, QueueError, QueueStore},
};

const ATTEMPTS_FIELD: &str = "attempts";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
  #[error(transparent)]
  Malformed(#[from] TaskError),
  #[error(transparent)]
  Cache(#[from] CacheError),
  #[error(transparent)]
  Queue(#[from] QueueError),
  #[error(transparent)]
  Search(#[from] SearchError),
  #[error("Failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl ProcessError {
  /// Malformed records and rejected documents fail the same way every time;
  /// everything else may pass later.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, ProcessError::Malformed(_) | ProcessError::Search(_))
  }
}

/// One concern's side effect, applied to a single dequeued task record.
#[async_trait]
pub trait Processor: Send + Sync {
  fn concern(&self) -> Concern;

  async fn process(&self, item: &Value) -> Result<(), ProcessError>;
}

/// Counters returned when a worker loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
  pub processed: u64,
  pub failed: u64,
  pub retried: u64,
  pub dead_lettered: u64,
}

/// Result of one pass over the priority queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
  /// An item was handled successfully
  Processed,
  /// An item failed (and was retried, dead-lettered or dropped)
  Failed,
  /// All three queues were empty
  Idle,
  /// The queue store could not be reached
  Unavailable,
}

pub struct Worker {
  processor: Arc<dyn Processor>,
  queue: Arc<dyn QueueStore>,
  config: WorkersConfig,
  stats: WorkerStats,
}

impl Worker {
  pub fn new(processor: Arc<dyn Processor>, queue: Arc<dyn QueueStore>, config: WorkersConfig) -> Self {
    Self {
      processor,
      queue,
      config,
      stats: WorkerStats::default(),
    }
  }

  pub fn stats(&self) -> WorkerStats {
    self.stats
  }

  /// Poll until `cancel` fires. The item in hand is always finished first.
  pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
    let concern = self.processor.concern();
    info!(concern = %concern, "Worker started");

    while !cancel.is_cancelled() {
      let pause = match self.poll_once().await {
        Poll::Processed => continue,
        Poll::Idle => self.config.idle_poll(),
        Poll::Failed | Poll::Unavailable => self.config.error_backoff(),
      };

      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        _ = tokio::time::sleep(pause) => {}
      }
    }

    info!(
      concern = %concern,
      processed = self.stats.processed,
      failed = self.stats.failed,
      "Worker stopped"
    );
    self.stats
  }

  /// Take the first available item in priority order and process it.
  pub async fn poll_once(&mut self) -> Poll {
    for queue in self.processor.concern().queues() {
      match self.queue.dequeue(&queue).await {
        Ok(Some(item)) => return self.handle(&queue, item).await,
        Ok(None) => continue,
        Err(e) => {
          warn!(queue = %queue, error = %e, "Queue unavailable");
          return Poll::Unavailable;
        }
      }
    }
    Poll::Idle
  }

  async fn handle(&mut self, queue: &str, mut item: Value) -> Poll {
    let error = match self.processor.process(&item).await {
      Ok(()) => {
        self.stats.processed += 1;
        trace!(queue, "Processed task");
        return Poll::Processed;
      }
      Err(e) => e,
    };
    self.stats.failed += 1;

    let attempts = item.get(ATTEMPTS_FIELD).and_then(Value::as_u64).unwrap_or(0) + 1;

    if error.is_retryable()
      && attempts < u64::from(self.config.max_attempts)
      && let Some(record) = item.as_object_mut()
    {
      record.insert(ATTEMPTS_FIELD.to_string(), json!(attempts));
      match self.queue.enqueue(queue, item).await {
        Ok(()) => {
          self.stats.retried += 1;
          warn!(queue, attempts, error = %error, "Task failed, requeued");
        }
        Err(e) => warn!(queue, error = %error, requeue_error = %e, "Task failed and could not be requeued"),
      }
      return Poll::Failed;
    }

    if !self.config.dead_letter {
      warn!(queue, attempts, error = %error, "Task failed, dropped");
      return Poll::Failed;
    }

    let dead_letter_queue = self.processor.concern().dead_letter_queue();
    let record = json!({
      "queue": queue,
      "error": error.to_string(),
      "attempts": attempts,
      "failedAt": Utc::now(),
      "task": item,
    });
    match self.queue.enqueue(&dead_letter_queue, record).await {
      Ok(()) => {
        self.stats.dead_lettered += 1;
        warn!(queue, dead_letter = %dead_letter_queue, attempts, error = %error, "Task dead-lettered");
      }
      Err(e) => warn!(queue, error = %error, dead_letter_error = %e, "Task failed and could not be dead-lettered"),
    }
    Poll::Failed
  }
}

/// Script adapter so the scheduler can keep a worker alive.
pub struct WorkerScript {
  processor: Arc<dyn Processor>,
  queue: Arc<dyn QueueStore>,
  config: WorkersConfig,
}

impl WorkerScript {
  pub fn new(processor: Arc<dyn Processor>, queue: Arc<dyn QueueStore>, config: WorkersConfig) -> Self {
    Self {
      processor,
      queue,
      config,
    }
  }
}

#[async_trait]
impl TaskScript for WorkerScript {
  async fn run(&self, _data: Value, cancel: CancellationToken) -> Result<Value, ScriptError> {
    let worker = Worker::new(self.processor.clone(), self.queue.clone(), self.config.clone());
    let stats = worker.run(cancel).await;
    debug!(concern = %self.processor.concern(), ?stats, "Worker script finished");
    serde_json::to_value(stats).map_err(ScriptError::new)
  }
}

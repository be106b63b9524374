//! Priority Queue Store - a process-wide collection of named FIFO queues.
//!
//! There is no intrinsic priority: producers encode priority into the queue name
//! (`{concern}-{priority}`) and consumers poll names in priority order.

use std::{
  collections::VecDeque,
  sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{
  remote::RemoteQueue,
  stats::{ActivityLog, QueueStats},
};
use crate::domain::config::{BackendKind, QueueConfig};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("Queue request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Invalid queue url: {0}")]
  InvalidUrl(String),
  #[error("Queue backend error: {0}")]
  Backend(String),
}

/// Statistics for one queue, as listed by `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsEntry {
  pub queue: String,
  pub depth: usize,
  #[serde(flatten)]
  pub stats: QueueStats,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
  /// Backend name for status output
  fn name(&self) -> &str;

  /// Append `item` to the tail of `queue`, creating it if absent.
  async fn enqueue(&self, queue: &str, item: Value) -> Result<(), QueueError>;

  /// Remove and return the head of `queue`; `None` when empty or unknown.
  async fn dequeue(&self, queue: &str) -> Result<Option<Value>, QueueError>;

  /// Current depth of `queue` (0 when unknown).
  async fn size(&self, queue: &str) -> Result<usize, QueueError>;

  /// Statistics of the most recently active queues, newest first.
  async fn stats(&self) -> Result<Vec<QueueStatsEntry>, QueueError>;
}

impl dyn QueueStore {
  pub fn from_config(config: &QueueConfig) -> Result<Arc<dyn QueueStore>, QueueError> {
    match config.backend {
      BackendKind::Memory => Ok(Arc::new(MemoryQueue::new(config.stats_capacity))),
      BackendKind::Remote => {
        let url = config
          .url
          .as_deref()
          .ok_or_else(|| QueueError::InvalidUrl("queue.url is not set".to_string()))?;
        Ok(Arc::new(RemoteQueue::new(url)?))
      }
    }
  }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-process queue store.
///
/// Each queue is guarded by its own map shard lock, so every operation is
/// atomic without callers locking externally.
pub struct MemoryQueue {
  queues: DashMap<String, VecDeque<Value>>,
  stats: Mutex<ActivityLog<QueueStats>>,
}

impl MemoryQueue {
  pub fn new(stats_capacity: usize) -> Self {
    Self {
      queues: DashMap::new(),
      stats: Mutex::new(ActivityLog::new(stats_capacity)),
    }
  }

  fn record(&self, queue: &str, update: impl FnOnce(&mut QueueStats)) {
    let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
    stats.touch(queue, QueueStats::new, update);
  }
}

impl Default for MemoryQueue {
  fn default() -> Self {
    Self::new(100)
  }
}

#[async_trait]
impl QueueStore for MemoryQueue {
  fn name(&self) -> &str {
    "memory"
  }

  async fn enqueue(&self, queue: &str, item: Value) -> Result<(), QueueError> {
    let depth = {
      let mut entry = self.queues.entry(queue.to_string()).or_default();
      entry.push_back(item);
      entry.len()
    };

    self.record(queue, |s| {
      s.enqueued += 1;
      s.last_enqueued = Some(Utc::now());
    });
    trace!(queue, depth, "Enqueued");
    Ok(())
  }

  async fn dequeue(&self, queue: &str) -> Result<Option<Value>, QueueError> {
    let item = self.queues.get_mut(queue).and_then(|mut q| q.pop_front());

    if item.is_some() {
      self.record(queue, |s| {
        s.dequeued += 1;
        s.last_dequeued = Some(Utc::now());
      });
      trace!(queue, "Dequeued");
    }
    Ok(item)
  }

  async fn size(&self, queue: &str) -> Result<usize, QueueError> {
    Ok(self.queues.get(queue).map(|q| q.len()).unwrap_or(0))
  }

  async fn stats(&self) -> Result<Vec<QueueStatsEntry>, QueueError> {
    let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
    let entries: Vec<QueueStatsEntry> = stats
      .iter_recent()
      .map(|(queue, s)| QueueStatsEntry {
        queue: queue.to_string(),
        depth: self.queues.get(queue).map(|q| q.len()).unwrap_or(0),
        stats: s.clone(),
      })
      .collect();
    debug!(queues = entries.len(), "Collected queue statistics");
    Ok(entries)
  }
}

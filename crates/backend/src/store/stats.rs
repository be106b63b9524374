//! Bounded activity map for observability statistics.
//!
//! Keeps the `capacity` most recently active entries. Every touch moves the entry
//! to the newest position; inserting past capacity evicts the least recently
//! active one. Ordering is tracked with a monotonically increasing sequence
//! number indexed by a `BTreeMap`, so eviction is `O(log n)` with no scan.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ActivityLog<V> {
  capacity: usize,
  next_seq: u64,
  /// key -> (sequence of last activity, record)
  entries: HashMap<String, (u64, V)>,
  /// sequence -> key, oldest first
  order: BTreeMap<u64, String>,
}

impl<V> ActivityLog<V> {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      next_seq: 0,
      entries: HashMap::new(),
      order: BTreeMap::new(),
    }
  }

  /// Record activity on `key`, creating the record with `init` if absent.
  pub fn touch(&mut self, key: &str, init: impl FnOnce() -> V, update: impl FnOnce(&mut V)) {
    let seq = self.next_seq;
    self.next_seq += 1;

    match self.entries.get_mut(key) {
      Some((old_seq, record)) => {
        self.order.remove(&*old_seq);
        *old_seq = seq;
        update(record);
      }
      None => {
        let mut record = init();
        update(&mut record);
        self.entries.insert(key.to_string(), (seq, record));
      }
    }
    self.order.insert(seq, key.to_string());

    while self.entries.len() > self.capacity {
      let Some((_, oldest)) = self.order.pop_first() else {
        break;
      };
      self.entries.remove(&oldest);
    }
  }

  pub fn get(&self, key: &str) -> Option<&V> {
    self.entries.get(key).map(|(_, record)| record)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Entries from most to least recently active.
  pub fn iter_recent(&self) -> impl Iterator<Item = (&str, &V)> {
    self.order.values().rev().filter_map(|key| {
      self
        .entries
        .get_key_value(key)
        .map(|(key, (_, record))| (key.as_str(), record))
    })
  }
}

// ============================================================================
// Records
// ============================================================================

/// Per-queue message statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
  pub enqueued: u64,
  pub dequeued: u64,
  pub last_enqueued: Option<DateTime<Utc>>,
  pub last_dequeued: Option<DateTime<Utc>>,
  pub created: DateTime<Utc>,
}

impl QueueStats {
  pub fn new() -> Self {
    Self {
      enqueued: 0,
      dequeued: 0,
      last_enqueued: None,
      last_dequeued: None,
      created: Utc::now(),
    }
  }
}

impl Default for QueueStats {
  fn default() -> Self {
    Self::new()
  }
}

/// Per-task run statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
  pub executions: u64,
  pub last_start: Option<DateTime<Utc>>,
  pub last_end: Option<DateTime<Utc>>,
  pub next_run: Option<DateTime<Utc>>,
  pub created: DateTime<Utc>,
}

impl TaskStats {
  pub fn new() -> Self {
    Self {
      executions: 0,
      last_start: None,
      last_end: None,
      next_run: None,
      created: Utc::now(),
    }
  }
}

impl Default for TaskStats {
  fn default() -> Self {
    Self::new()
  }
}

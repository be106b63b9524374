//! Debounce state for changes waiting out the stability window.

use std::{
  collections::HashMap,
  path::PathBuf,
  time::{Duration, Instant},
};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Created,
  Modified,
  Deleted,
}

/// Net effect of `earlier` followed by `later` on the same path.
///
/// A file that appears and is then written is still new; one that disappears
/// and comes back was changed; one that appears and vanishes is reported as
/// deleted so any stale keys for it are dropped. Otherwise the later kind wins.
pub fn coalesce(earlier: ChangeKind, later: ChangeKind) -> ChangeKind {
  match (earlier, later) {
    (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
    (ChangeKind::Deleted, ChangeKind::Created) => ChangeKind::Modified,
    (_, later) => later,
  }
}

#[derive(Debug, Clone)]
pub struct PendingChange {
  pub kind: ChangeKind,
  /// Set once any event for the path saw a directory
  pub is_dir: bool,
  touched: Instant,
}

impl PendingChange {
  pub fn new(kind: ChangeKind, is_dir: bool) -> Self {
    Self {
      kind,
      is_dir,
      touched: Instant::now(),
    }
  }

  /// Fold another event into this change and restart its quiet period.
  pub fn merge(&mut self, kind: ChangeKind, is_dir: bool) {
    let merged = coalesce(self.kind, kind);
    if merged != kind {
      trace!(earlier = ?self.kind, later = ?kind, merged = ?merged, "Coalesced change");
    }
    self.kind = merged;
    self.is_dir |= is_dir;
    self.touched = Instant::now();
  }

  fn quiet_for(&self, now: Instant) -> Duration {
    now.saturating_duration_since(self.touched)
  }
}

/// Changes keyed by absolute path.
#[derive(Debug, Default)]
pub struct PendingChanges {
  changes: HashMap<PathBuf, PendingChange>,
}

impl PendingChanges {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, path: PathBuf, kind: ChangeKind, is_dir: bool) {
    self
      .changes
      .entry(path)
      .and_modify(|existing| existing.merge(kind, is_dir))
      .or_insert_with(|| PendingChange::new(kind, is_dir));
  }

  /// Put back a change that could not be published; it settles again after a full window.
  pub fn requeue(&mut self, path: PathBuf, mut change: PendingChange) {
    change.touched = Instant::now();
    self.changes.entry(path).or_insert(change);
  }

  /// Remove and return changes quiet for at least `window`.
  pub fn take_settled(&mut self, window: Duration) -> Vec<(PathBuf, PendingChange)> {
    let now = Instant::now();
    let (settled, waiting): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut self.changes)
      .into_iter()
      .partition(|(_, change)| change.quiet_for(now) >= window);
    self.changes = waiting;
    settled.into_iter().collect()
  }

  /// Remove and return everything (shutdown).
  pub fn take_all(&mut self) -> Vec<(PathBuf, PendingChange)> {
    self.changes.drain().collect()
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_coalesce() {
    use ChangeKind::*;
    let cases = [
      (Created, Modified, Created),
      (Deleted, Created, Modified),
      (Created, Deleted, Deleted),
      (Modified, Deleted, Deleted),
      (Modified, Modified, Modified),
    ];
    for (earlier, later, expected) in cases {
      assert_eq!(coalesce(earlier, later), expected, "{:?} then {:?}", earlier, later);
    }
  }

  #[test]
  fn test_directory_flag_sticks() {
    let mut pending = PendingChange::new(ChangeKind::Created, true);
    pending.merge(ChangeKind::Deleted, false);
    assert!(pending.is_dir);
  }

  #[test]
  fn test_take_settled_respects_window() {
    let mut changes = PendingChanges::new();
    changes.record(PathBuf::from("/a"), ChangeKind::Created, false);

    assert!(changes.take_settled(Duration::from_secs(60)).is_empty());
    assert_eq!(changes.len(), 1);

    let settled = changes.take_settled(Duration::ZERO);
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].0, PathBuf::from("/a"));
    assert!(changes.is_empty());
  }

  #[test]
  fn test_activity_resets_window() {
    let mut changes = PendingChanges::new();
    changes.record(PathBuf::from("/a"), ChangeKind::Created, false);
    std::thread::sleep(Duration::from_millis(30));
    changes.record(PathBuf::from("/a"), ChangeKind::Modified, false);

    assert!(changes.take_settled(Duration::from_millis(25)).is_empty());
    let all = changes.take_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.kind, ChangeKind::Created);
  }

  #[test]
  fn test_requeue_does_not_clobber_newer_change() {
    let mut changes = PendingChanges::new();
    changes.record(PathBuf::from("/a"), ChangeKind::Deleted, false);
    changes.requeue(PathBuf::from("/a"), PendingChange::new(ChangeKind::Created, false));
    assert_eq!(changes.take_all()[0].1.kind, ChangeKind::Deleted);
  }
}

//! File Event Watcher - observes the content roots and publishes classified events.
//!
//! The watcher bridges notify's sync callbacks with the async pipeline:
//! 1. notify's callback uses `blocking_send` to forward events to a channel
//! 2. the async loop folds events into `PendingChanges`, coalescing per path
//! 3. a change is published once its path has been quiet for the stability window
//! 4. publishing fans the event out onto `file-events` and the concern queues
//!
//! Every entry under the roots is tracked so that a removal reported without a
//! type can still be published as `unlinkDir`. A directory moved or removed as a
//! whole raises no per-file events, so `unlinkDir` is expanded into an `unlink`
//! for every tracked descendant and `addDir` walks the new directory. Remaining
//! pending changes are flushed on shutdown.

mod classify;
mod pending;
mod publish;

use std::{
  collections::BTreeMap,
  ops::Bound,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use notify::{
  Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
  event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
};
use pending::{ChangeKind, PendingChange, PendingChanges};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::{
  domain::{
    config::WatcherConfig,
    keys::Scope,
    task::{FileAction, FileEvent},
  },
  store::QueueStore,
};

pub use classify::{Attribution, IGNORE_FILE, Roots, WatchRoot, classify_priority, extension};
pub use publish::{EventPublisher, PublishError, fan_out};

/// Errors that can occur in the watcher
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("No watch roots configured (set watcher.personal_root or watcher.spaces_root)")]
  NoRoots,

  #[error("Watch root {path} is not accessible: {source}")]
  Root {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),

  #[error("Failed to build ignore rules: {0}")]
  Ignore(#[source] ignore::Error),
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct WatcherCounters {
  seen: AtomicU64,
  published: AtomicU64,
  ignored: AtomicU64,
  dropped: AtomicU64,
  failed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherStats {
  /// Paths reported by the OS
  pub seen: u64,
  /// Events fanned out onto the queues
  pub published: u64,
  /// Paths matching an ignore rule
  pub ignored: u64,
  /// Paths outside every root
  pub dropped: u64,
  /// Publish attempts that failed
  pub failed: u64,
}

impl WatcherCounters {
  pub fn snapshot(&self) -> WatcherStats {
    WatcherStats {
      seen: self.seen.load(Ordering::Relaxed),
      published: self.published.load(Ordering::Relaxed),
      ignored: self.ignored.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
    }
  }

  fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Async file watcher that publishes classified events onto the queue store.
pub struct FileWatcher {
  roots: Roots,
  stability: Duration,
  initial_scan: bool,
  publisher: EventPublisher,
  cancel: CancellationToken,
  counters: Arc<WatcherCounters>,
  // The notify watcher must be held to keep it alive
  _watcher: RecommendedWatcher,
  // Channel receiving events from notify's sync callback
  event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  // Entries known to exist (path -> is_dir). Ordered so a directory's
  // descendants form one contiguous range.
  known: BTreeMap<PathBuf, bool>,
}

impl FileWatcher {
  /// Create a new FileWatcher
  ///
  /// This resolves the configured roots and starts watching them. Events are
  /// buffered until `run()` is called.
  pub fn new(
    config: &WatcherConfig,
    queue: Arc<dyn QueueStore>,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let mut roots = Vec::new();
    if let Some(path) = &config.personal_root {
      roots.push(WatchRoot::new(path, Scope::Personal, &config.extra_ignores)?);
    }
    if let Some(path) = &config.spaces_root {
      roots.push(WatchRoot::new(path, Scope::Git, &config.extra_ignores)?);
    }
    if roots.is_empty() {
      return Err(WatcherError::NoRoots);
    }
    let roots = Roots::new(roots, config.space_access.clone());

    // The sync callback uses blocking_send, so we need a reasonable buffer
    let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(1024);

    let notify_config = Config::default().with_poll_interval(config.poll_interval());
    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // This runs on notify's thread. If the channel is closed we drop the event.
        let _ = event_tx.blocking_send(res);
      },
      notify_config,
    )
    .map_err(WatcherError::Init)?;

    for root in roots.iter() {
      watcher
        .watch(&root.path, RecursiveMode::Recursive)
        .map_err(WatcherError::Watch)?;
      info!(root = %root.path.display(), scope = %root.scope, "Watching root");
    }

    Ok(Self {
      roots,
      stability: config.stability(),
      initial_scan: config.initial_scan,
      publisher: EventPublisher::new(queue),
      cancel,
      counters: Arc::new(WatcherCounters::default()),
      _watcher: watcher,
      event_rx,
      known: BTreeMap::new(),
    })
  }

  /// Shared counters, readable while the watcher runs.
  pub fn counters(&self) -> Arc<WatcherCounters> {
    self.counters.clone()
  }

  /// Run the watcher until cancelled or the event channel closes.
  pub async fn run(mut self) -> WatcherStats {
    self.scan().await;
    info!(stability_ms = self.stability.as_millis() as u64, "File watcher started");

    let mut pending = PendingChanges::new();

    // Check often enough that a settled change waits at most ~half a window extra
    let tick = (self.stability / 2).max(Duration::from_millis(10));
    let mut flush_interval = tokio::time::interval(tick);

    loop {
      tokio::select! {
          // Check cancellation first (biased)
          biased;

          _ = self.cancel.cancelled() => {
              info!("File watcher shutting down (cancelled)");
              break;
          }

          event = self.event_rx.recv() => {
              match event {
                  Some(Ok(event)) => self.process_event(&mut pending, event),
                  Some(Err(e)) => warn!(error = %e, "Watcher error"),
                  None => {
                      info!("File watcher shutting down (channel closed)");
                      break;
                  }
              }
          }

          _ = flush_interval.tick() => {
              let settled = pending.take_settled(self.stability);
              if !settled.is_empty() {
                  debug!(count = settled.len(), "Flushing settled changes");
                  for (path, change) in settled {
                      if !self.send_change(&path, &change).await {
                          pending.requeue(path, change);
                      }
                  }
              }
          }
      }
    }

    // Flush any remaining pending events before shutdown
    if !pending.is_empty() {
      debug!(pending = pending.len(), "Flushing remaining pending events on shutdown");
      for (path, change) in pending.take_all() {
        self.send_change(&path, &change).await;
      }
    }

    let stats = self.counters.snapshot();
    info!(
      seen = stats.seen,
      published = stats.published,
      ignored = stats.ignored,
      dropped = stats.dropped,
      "File watcher stopped"
    );
    stats
  }

  /// Record existing entries; with `initial_scan`, also publish every
  /// existing entry so a cold cache gets primed.
  async fn scan(&mut self) {
    let mut entries: Vec<(PathBuf, bool)> = Vec::new();
    for root in self.roots.iter() {
      entries.extend(self.walk(&root.path));
    }

    let dirs = entries.iter().filter(|(_, d)| *d).count();
    self.known.extend(entries.iter().cloned());

    if !self.initial_scan {
      debug!(entries = entries.len(), dirs, "Recorded existing entries");
      return;
    }

    info!(entries = entries.len(), dirs, "Publishing initial scan");
    for (path, is_dir) in entries {
      let action = if is_dir { FileAction::AddDir } else { FileAction::Add };
      self.publish(&path, action, is_dir).await;
    }
  }

  /// Non-ignored entries below `dir`, parents before children.
  fn walk(&self, dir: &Path) -> Vec<(PathBuf, bool)> {
    WalkDir::new(dir)
      .min_depth(1)
      .into_iter()
      .filter_entry(|e| !self.roots.is_ignored(e.path(), e.file_type().is_dir()))
      .filter_map(Result::ok)
      .map(|entry| {
        let is_dir = entry.file_type().is_dir();
        (entry.into_path(), is_dir)
      })
      .collect()
  }

  fn is_known_dir(&self, path: &Path) -> bool {
    self.known.get(path).copied().unwrap_or(false)
  }

  /// Tracked entries strictly below `dir`, children after their parents.
  fn known_descendants(&self, dir: &Path) -> Vec<(PathBuf, bool)> {
    self
      .known
      .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
      .take_while(|(path, _)| path.starts_with(dir))
      .map(|(path, is_dir)| (path.clone(), *is_dir))
      .collect()
  }

  /// Process a single notify event into pending changes
  fn process_event(&mut self, pending: &mut PendingChanges, event: Event) {
    // Renames reported with both paths: unlink the old path, add the new one
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind
      && let [from, to] = event.paths.as_slice()
    {
      let from_dir = self.is_known_dir(from);
      self.record(pending, from.clone(), ChangeKind::Deleted, from_dir);
      let to_dir = to.is_dir();
      self.record(pending, to.clone(), ChangeKind::Created, to_dir);
      return;
    }

    for path in &event.paths {
      let (kind, is_dir) = match event.kind {
        EventKind::Create(create) => (ChangeKind::Created, create == CreateKind::Folder || path.is_dir()),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => (ChangeKind::Deleted, self.is_known_dir(path)),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => (ChangeKind::Created, path.is_dir()),
        EventKind::Modify(ModifyKind::Name(_)) => {
          if path.exists() {
            (ChangeKind::Created, path.is_dir())
          } else {
            (ChangeKind::Deleted, self.is_known_dir(path))
          }
        }
        EventKind::Modify(_) => {
          // Metadata/content changes on directories carry no information for us
          if path.is_dir() {
            trace!(path = %path.display(), "Skipping directory modify");
            continue;
          }
          (ChangeKind::Modified, false)
        }
        EventKind::Remove(remove) => (
          ChangeKind::Deleted,
          remove == RemoveKind::Folder || self.is_known_dir(path),
        ),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
          trace!(path = %path.display(), kind = ?event.kind, "Ignoring event");
          continue;
        }
      };
      self.record(pending, path.clone(), kind, is_dir);
    }
  }

  fn record(&mut self, pending: &mut PendingChanges, path: PathBuf, kind: ChangeKind, is_dir: bool) {
    WatcherCounters::bump(&self.counters.seen);

    if self.roots.root_of(&path).is_none() {
      WatcherCounters::bump(&self.counters.dropped);
      trace!(path = %path.display(), "Outside every root");
      return;
    }
    if self.roots.is_ignored(&path, is_dir) {
      WatcherCounters::bump(&self.counters.ignored);
      trace!(path = %path.display(), "Skipping ignored path");
      return;
    }

    trace!(path = %path.display(), ?kind, is_dir, "Change recorded");
    pending.record(path, kind, is_dir);
  }

  /// Publish a settled change. Returns false when it should be retried.
  async fn send_change(&mut self, path: &Path, change: &PendingChange) -> bool {
    let exists = path.exists();
    let (action, is_dir) = match change.kind {
      // Gone again before it settled
      ChangeKind::Created | ChangeKind::Modified if !exists => {
        let is_dir = change.is_dir || self.is_known_dir(path);
        (if is_dir { FileAction::UnlinkDir } else { FileAction::Unlink }, is_dir)
      }
      ChangeKind::Created if change.is_dir || path.is_dir() => (FileAction::AddDir, true),
      ChangeKind::Created => (FileAction::Add, false),
      ChangeKind::Modified if path.is_dir() => return true,
      ChangeKind::Modified => (FileAction::Change, false),
      ChangeKind::Deleted if exists => {
        // Replaced in place (e.g. atomic save via rename)
        if path.is_dir() {
          return true;
        }
        (FileAction::Change, false)
      }
      ChangeKind::Deleted => {
        let is_dir = change.is_dir || self.is_known_dir(path);
        (if is_dir { FileAction::UnlinkDir } else { FileAction::Unlink }, is_dir)
      }
    };

    match action {
      FileAction::AddDir => self.publish_dir_added(path).await,
      FileAction::UnlinkDir => self.publish_dir_removed(path).await,
      FileAction::Unlink => {
        self.known.remove(path);
        self.publish(path, action, false).await
      }
      _ => {
        self.known.insert(path.to_path_buf(), is_dir);
        self.publish(path, action, is_dir).await
      }
    }
  }

  /// `addDir` for `dir`, then `add`/`addDir` for everything already inside it
  /// (a directory renamed or moved into the tree arrives populated).
  async fn publish_dir_added(&mut self, dir: &Path) -> bool {
    self.known.insert(dir.to_path_buf(), true);
    let mut ok = self.publish(dir, FileAction::AddDir, true).await;

    let children = self.walk(dir);
    if !children.is_empty() {
      debug!(dir = %dir.display(), entries = children.len(), "Publishing contents of new directory");
    }
    for (path, is_dir) in children {
      self.known.insert(path.clone(), is_dir);
      let action = if is_dir { FileAction::AddDir } else { FileAction::Add };
      ok &= self.publish(&path, action, is_dir).await;
    }
    ok
  }

  /// `unlink`/`unlinkDir` for every tracked entry below `dir`, deepest first,
  /// then `unlinkDir` for `dir` itself.
  async fn publish_dir_removed(&mut self, dir: &Path) -> bool {
    let descendants = self.known_descendants(dir);
    if !descendants.is_empty() {
      debug!(dir = %dir.display(), entries = descendants.len(), "Publishing removal of directory contents");
    }

    // Entries whose publish failed stay tracked so a retry of `dir` covers them
    let mut ok = true;
    for (path, is_dir) in descendants.into_iter().rev() {
      let action = if is_dir { FileAction::UnlinkDir } else { FileAction::Unlink };
      if self.publish(&path, action, is_dir).await {
        self.known.remove(&path);
      } else {
        ok = false;
      }
    }
    ok &= self.publish(dir, FileAction::UnlinkDir, true).await;
    if ok {
      self.known.remove(dir);
    }
    ok
  }

  /// Attribute, classify and publish one event. Returns false on a publish
  /// failure worth retrying.
  async fn publish(&self, path: &Path, action: FileAction, is_dir: bool) -> bool {
    let Some(attribution) = self.roots.attribute(path) else {
      WatcherCounters::bump(&self.counters.dropped);
      trace!(path = %path.display(), "No owner for path");
      return true;
    };

    let event = FileEvent {
      action,
      priority: classify_priority(&attribution.rel_path),
      path: attribution.rel_path,
      owner: (&attribution.owner).into(),
      space_access: attribution.space_access,
      timestamp: Utc::now(),
      full_path: path.to_path_buf(),
      is_directory: is_dir,
    };

    match self.publisher.publish(&event).await {
      Ok(()) => {
        WatcherCounters::bump(&self.counters.published);
        true
      }
      Err(PublishError::Queue(e)) => {
        WatcherCounters::bump(&self.counters.failed);
        warn!(path = %event.path, error = %e, "Failed to publish event, will retry");
        false
      }
      Err(e) => {
        WatcherCounters::bump(&self.counters.failed);
        warn!(path = %event.path, error = %e, "Dropping unpublishable event");
        true
      }
    }
  }
}

//! Fan-out of classified file events onto the named queues.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{
  domain::{
    keys::{Concern, FILE_EVENTS_QUEUE, Owner},
    task::{self, CacheAction, CacheTask, ContentAction, ContentTask, FileAction, FileEvent, SearchTask, TaskError},
  },
  store::{QueueError, QueueStore},
};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
  #[error(transparent)]
  Task(#[from] TaskError),
  #[error(transparent)]
  Queue(#[from] QueueError),
}

/// Queue items produced for one event, in enqueue order.
///
/// - every event: the raw event on `file-events`
/// - `add` / `change`: cache `invalidate`, plus a content `reindex` for files
/// - `unlink` / `unlinkDir`: cache `remove` and search `remove`
/// - `addDir`: cache `refresh-tree`
pub fn fan_out(event: &FileEvent) -> Result<Vec<(String, Value)>, TaskError> {
  let owner: Owner = event.owner.resolve()?;
  let priority = event.priority;
  let mut items = vec![(FILE_EVENTS_QUEUE.to_string(), task::encode(event)?)];

  match event.action {
    FileAction::Add | FileAction::Change => {
      items.push((
        Concern::CacheUpdates.queue(priority),
        task::encode(&CacheTask::new(CacheAction::Invalidate, &owner, &event.path))?,
      ));
      if !event.is_directory {
        items.push((
          Concern::ContentProcessing.queue(priority),
          task::encode(&ContentTask {
            action: ContentAction::Reindex,
            path: event.path.clone(),
            owner: (&owner).into(),
            full_path: event.full_path.clone(),
            priority,
          })?,
        ));
      }
    }
    FileAction::Unlink | FileAction::UnlinkDir => {
      items.push((
        Concern::CacheUpdates.queue(priority),
        task::encode(&CacheTask::new(CacheAction::Remove, &owner, &event.path))?,
      ));
      items.push((
        Concern::SearchIndexing.queue(priority),
        task::encode(&SearchTask::remove(&owner, &event.path))?,
      ));
    }
    FileAction::AddDir => {
      items.push((
        Concern::CacheUpdates.queue(priority),
        task::encode(&CacheTask::new(CacheAction::RefreshTree, &owner, &event.path))?,
      ));
    }
  }

  Ok(items)
}

#[derive(Clone)]
pub struct EventPublisher {
  queue: Arc<dyn QueueStore>,
}

impl EventPublisher {
  pub fn new(queue: Arc<dyn QueueStore>) -> Self {
    Self { queue }
  }

  pub async fn publish(&self, event: &FileEvent) -> Result<(), PublishError> {
    let items = fan_out(event)?;
    let count = items.len();
    for (queue, item) in items {
      self.queue.enqueue(&queue, item).await?;
    }
    debug!(
      action = ?event.action,
      path = %event.path,
      priority = %event.priority,
      queues = count,
      "Published file event"
    );
    Ok(())
  }
}

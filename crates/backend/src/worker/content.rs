//! Content Processor - reads changed files and fans out derived work.
//!
//! Each reindex produces exactly two follow-up tasks, both at medium priority:
//! a cache `update` with the raw content and metadata, and a search `index`
//! with the extracted plain text.

use std::{io::ErrorKind, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ProcessError, Processor, extract::extract};
use crate::{
  domain::{
    keys::{Concern, Priority},
    task::{self, CacheTask, ContentTask, SearchTask},
  },
  store::QueueStore,
};

pub struct ContentProcessor {
  queue: Arc<dyn QueueStore>,
  max_bytes: u64,
}

impl ContentProcessor {
  pub fn new(queue: Arc<dyn QueueStore>, max_bytes: u64) -> Self {
    Self { queue, max_bytes }
  }
}

#[async_trait]
impl Processor for ContentProcessor {
  fn concern(&self) -> Concern {
    Concern::ContentProcessing
  }

  async fn process(&self, item: &Value) -> Result<(), ProcessError> {
    let task: ContentTask = task::decode(item.clone())?;
    let owner = task.owner.resolve()?;

    let extracted = match extract(&task.full_path, &task.path, self.max_bytes).await {
      Ok(extracted) => extracted,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        // Deleted before we got to it; the unlink event cleans up.
        debug!(path = %task.path, "File vanished before reindex");
        return Ok(());
      }
      Err(source) => {
        return Err(ProcessError::Io {
          path: task.full_path,
          source,
        });
      }
    };
    debug!(path = %task.path, kind = ?extracted.kind, "Extracted content");

    let update = CacheTask::update(
      &owner,
      &task.path,
      extracted.content.map(Value::String),
      extracted.metadata.clone(),
    );
    self
      .queue
      .enqueue(&Concern::CacheUpdates.queue(Priority::Medium), task::encode(&update)?)
      .await?;

    let index = SearchTask::index(&owner, &task.path, extracted.text, extracted.metadata);
    self
      .queue
      .enqueue(&Concern::SearchIndexing.queue(Priority::Medium), task::encode(&index)?)
      .await?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;
  use crate::{
    domain::{keys::Owner, task::ContentAction},
    store::MemoryQueue,
  };

  fn reindex(owner: &Owner, path: &str, full_path: std::path::PathBuf) -> Value {
    task::encode(&ContentTask {
      action: ContentAction::Reindex,
      path: path.to_string(),
      owner: owner.into(),
      full_path,
      priority: Priority::High,
    })
    .unwrap()
  }

  #[tokio::test]
  async fn test_reindex_fans_out_at_medium_priority() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.md");
    std::fs::write(&file, "# Title\n\nBody *text*").unwrap();

    let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
    let processor = ContentProcessor::new(queue.clone(), 1024);
    let alice = Owner::personal("alice");
    processor.process(&reindex(&alice, "notes/a.md", file)).await.unwrap();

    let update = queue.dequeue("cache-updates-medium").await.unwrap().unwrap();
    assert_eq!(update["action"], "update");
    assert_eq!(update["username"], "alice");
    assert_eq!(update["path"], "notes/a.md");
    assert_eq!(update["content"], "# Title\n\nBody *text*");
    assert_eq!(update["metadata"]["title"], "Title");

    let index = queue.dequeue("search-indexing-medium").await.unwrap().unwrap();
    assert_eq!(index["action"], "index");
    assert_eq!(index["searchableText"], "Title Body text");
    assert_eq!(index["metadata"]["kind"], "markdown");

    assert_eq!(queue.size("cache-updates-high").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_binary_update_has_no_content() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("logo.png");
    std::fs::write(&file, [0u8, 1, 2]).unwrap();

    let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
    let processor = ContentProcessor::new(queue.clone(), 1024);
    let space = Owner::space("projectX");
    processor.process(&reindex(&space, "logo.png", file)).await.unwrap();

    let update = queue.dequeue("cache-updates-medium").await.unwrap().unwrap();
    assert_eq!(update["spaceName"], "projectX");
    assert!(update.get("content").is_none());
    assert_eq!(update["metadata"]["stub"], true);
  }

  #[tokio::test]
  async fn test_vanished_file_is_skipped() {
    let temp = TempDir::new().unwrap();
    let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
    let processor = ContentProcessor::new(queue.clone(), 1024);

    let item = reindex(&Owner::personal("alice"), "gone.md", temp.path().join("gone.md"));
    processor.process(&item).await.unwrap();
    assert_eq!(queue.size("cache-updates-medium").await.unwrap(), 0);
    assert_eq!(queue.size("search-indexing-medium").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_unreadable_path_is_retryable() {
    let temp = TempDir::new().unwrap();
    let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
    let processor = ContentProcessor::new(queue, 1024);

    // a directory cannot be read as a file
    let item = reindex(&Owner::personal("alice"), "dir", temp.path().to_path_buf());
    let err = processor.process(&item).await.unwrap_err();
    assert!(matches!(err, ProcessError::Io { .. }));
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_missing_owner_is_malformed() {
    let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
    let processor = ContentProcessor::new(queue, 1024);
    let err = processor
      .process(&json!({"action": "reindex", "path": "a.md", "fullPath": "/tmp/a.md", "priority": "high"}))
      .await
      .unwrap_err();
    assert!(!err.is_retryable());
  }
}

//! Cache Processor - applies invalidations and pre-computed updates.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ProcessError, Processor};
use crate::{
  domain::{
    keys::{CacheKind, Concern, Owner, parent_path},
    task::{self, CacheAction, CacheTask},
  },
  store::CacheStore,
};

pub struct CacheProcessor {
  cache: Arc<CacheStore>,
}

impl CacheProcessor {
  pub fn new(cache: Arc<CacheStore>) -> Self {
    Self { cache }
  }

  /// Drop every kind of entry for `path`, plus the parent's listing entries.
  async fn invalidate(&self, owner: &Owner, path: &str) -> Result<(), ProcessError> {
    for kind in CacheKind::ALL {
      self.cache.delete(&owner.cache_key(kind, path)).await?;
    }
    let parent = parent_path(path);
    self.cache.delete(&owner.cache_key(CacheKind::Tree, parent)).await?;
    self.cache.delete(&owner.cache_key(CacheKind::List, parent)).await?;
    Ok(())
  }

  async fn refresh_tree(&self, owner: &Owner, path: &str) -> Result<(), ProcessError> {
    self.cache.delete(&owner.cache_key(CacheKind::Tree, path)).await?;
    self
      .cache
      .delete(&owner.cache_key(CacheKind::Tree, parent_path(path)))
      .await?;
    Ok(())
  }

  async fn update(&self, owner: &Owner, task: CacheTask) -> Result<(), ProcessError> {
    let content_key = owner.cache_key(CacheKind::Content, &task.path);
    match task.content {
      Some(content) => self.cache.put(&content_key, content).await?,
      None => self.cache.delete(&content_key).await?,
    }
    if let Some(metadata) = task.metadata {
      self.cache.put(&owner.cache_key(CacheKind::Meta, &task.path), metadata).await?;
    }
    Ok(())
  }
}

#[async_trait]
impl Processor for CacheProcessor {
  fn concern(&self) -> Concern {
    Concern::CacheUpdates
  }

  async fn process(&self, item: &Value) -> Result<(), ProcessError> {
    let task: CacheTask = task::decode(item.clone())?;
    let owner = task.owner.resolve()?;
    debug!(action = ?task.action, path = %task.path, owner = %owner.identity, "Cache task");

    match task.action {
      CacheAction::Invalidate | CacheAction::Remove => self.invalidate(&owner, &task.path).await,
      CacheAction::RefreshTree => self.refresh_tree(&owner, &task.path).await,
      CacheAction::Update => self.update(&owner, task).await,
    }
  }
}

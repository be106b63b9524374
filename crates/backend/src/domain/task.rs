//! Task records carried by the queues.
//!
//! Queues store opaque JSON values; these types are the typed view producers
//! serialize from and processors decode into. Field names are camelCase on the
//! wire.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::keys::{Owner, Priority, Scope};

/// A task record that could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
  #[error("Task has neither username nor spaceName")]
  MissingOwner,
  #[error("Malformed task: {0}")]
  Decode(#[from] serde_json::Error),
}

/// Decode a queue item into a typed task record.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TaskError> {
  Ok(serde_json::from_value(value)?)
}

/// Encode a typed task record into a queue item.
pub fn encode<T: Serialize>(task: &T) -> Result<Value, TaskError> {
  Ok(serde_json::to_value(task)?)
}

// ============================================================================
// Owner fields
// ============================================================================

/// `username | spaceName` as it appears in every task record.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRef {
  pub username: Option<String>,
  pub space_name: Option<String>,
}

impl OwnerRef {
  pub fn resolve(&self) -> Result<Owner, TaskError> {
    match (&self.username, &self.space_name) {
      (Some(user), _) => Ok(Owner::personal(user.clone())),
      (None, Some(space)) => Ok(Owner::space(space.clone())),
      (None, None) => Err(TaskError::MissingOwner),
    }
  }
}

impl From<&Owner> for OwnerRef {
  fn from(owner: &Owner) -> Self {
    match owner.scope {
      Scope::Personal => Self {
        username: Some(owner.identity.clone()),
        space_name: None,
      },
      Scope::Git => Self {
        username: None,
        space_name: Some(owner.identity.clone()),
      },
    }
  }
}

// ============================================================================
// File events
// ============================================================================

/// Kind of filesystem change, named the way the watcher publishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileAction {
  Add,
  Change,
  Unlink,
  AddDir,
  UnlinkDir,
}

impl FileAction {
  pub fn is_removal(&self) -> bool {
    matches!(self, FileAction::Unlink | FileAction::UnlinkDir)
  }
}

/// Raw classified event published on `file-events`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
  pub action: FileAction,
  /// Path relative to the owner's root, `/`-separated
  pub path: String,
  #[serde(flatten)]
  pub owner: OwnerRef,
  pub space_access: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub priority: Priority,
  pub full_path: PathBuf,
  pub is_directory: bool,
}

// ============================================================================
// Cache tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheAction {
  /// Drop content/meta/tree/list entries after a change
  Invalidate,
  /// Drop content/meta/tree/list entries after a deletion
  Remove,
  /// Drop only the tree entry after a directory appeared
  RefreshTree,
  /// Write pre-computed content and metadata
  Update,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheTask {
  pub action: CacheAction,
  pub path: String,
  #[serde(flatten)]
  pub owner: OwnerRef,
  pub content: Option<Value>,
  pub metadata: Option<Value>,
}

impl CacheTask {
  pub fn new(action: CacheAction, owner: &Owner, path: impl Into<String>) -> Self {
    Self {
      action,
      path: path.into(),
      owner: owner.into(),
      content: None,
      metadata: None,
    }
  }

  pub fn update(owner: &Owner, path: impl Into<String>, content: Option<Value>, metadata: Value) -> Self {
    Self {
      content,
      metadata: Some(metadata),
      ..Self::new(CacheAction::Update, owner, path)
    }
  }
}

// ============================================================================
// Content tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentAction {
  Reindex,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTask {
  pub action: ContentAction,
  pub path: String,
  #[serde(flatten)]
  pub owner: OwnerRef,
  pub full_path: PathBuf,
  pub priority: Priority,
}

// ============================================================================
// Search tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchAction {
  Index,
  Remove,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTask {
  pub action: SearchAction,
  pub path: String,
  #[serde(flatten)]
  pub owner: OwnerRef,
  pub searchable_text: Option<String>,
  pub metadata: Option<Value>,
}

impl SearchTask {
  pub fn index(owner: &Owner, path: impl Into<String>, text: String, metadata: Value) -> Self {
    Self {
      action: SearchAction::Index,
      path: path.into(),
      owner: owner.into(),
      searchable_text: Some(text),
      metadata: Some(metadata),
    }
  }

  pub fn remove(owner: &Owner, path: impl Into<String>) -> Self {
    Self {
      action: SearchAction::Remove,
      path: path.into(),
      owner: owner.into(),
      searchable_text: None,
      metadata: None,
    }
  }
}

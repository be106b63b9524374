//! Naming conventions shared by every pipeline component.
//!
//! Producers and consumers never exchange priorities or owners out of band:
//! everything is encoded into names.
//!
//! - Cache keys: `{scope}:{identity}:{kind}:{path}`
//! - Search ids: `{scope}:{identity}:{path}`
//! - Queue names: `{concern}-{priority}` or a bare channel name (`file-events`)

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Bare channel carrying raw watcher events.
pub const FILE_EVENTS_QUEUE: &str = "file-events";

// ============================================================================
// Scope / Owner
// ============================================================================

/// Tenant class of a cache or search key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
  /// A user's personal content tree
  Personal,
  /// A named collaborative space (git-backed)
  Git,
}

impl Scope {
  pub fn as_str(&self) -> &'static str {
    match self {
      Scope::Personal => "personal",
      Scope::Git => "git",
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Scope {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "personal" => Ok(Scope::Personal),
      "git" => Ok(Scope::Git),
      _ => Err(format!("Invalid scope: {}", s)),
    }
  }
}

/// The owning tenant of a path: a scope plus a username or space name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
  pub scope: Scope,
  pub identity: String,
}

impl Owner {
  pub fn personal(username: impl Into<String>) -> Self {
    Self {
      scope: Scope::Personal,
      identity: username.into(),
    }
  }

  pub fn space(name: impl Into<String>) -> Self {
    Self {
      scope: Scope::Git,
      identity: name.into(),
    }
  }

  /// Cache key for one kind of entry about `path`.
  pub fn cache_key(&self, kind: CacheKind, path: &str) -> String {
    cache_key(self.scope, &self.identity, kind, path)
  }

  /// Search document id for `path`.
  pub fn search_id(&self, path: &str) -> String {
    search_id(self.scope, &self.identity, path)
  }
}

// ============================================================================
// Cache keys
// ============================================================================

/// Kind segment of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
  /// Rendered / raw file content
  Content,
  /// File metadata (size, title, hash, ...)
  Meta,
  /// Directory tree rooted at the path
  Tree,
  /// Directory listing of the path
  List,
}

impl CacheKind {
  pub const ALL: [CacheKind; 4] = [CacheKind::Content, CacheKind::Meta, CacheKind::Tree, CacheKind::List];

  pub fn as_str(&self) -> &'static str {
    match self {
      CacheKind::Content => "content",
      CacheKind::Meta => "meta",
      CacheKind::Tree => "tree",
      CacheKind::List => "list",
    }
  }
}

impl fmt::Display for CacheKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

pub fn cache_key(scope: Scope, identity: &str, kind: CacheKind, path: &str) -> String {
  format!("{}:{}:{}:{}", scope, identity, kind, path)
}

pub fn search_id(scope: Scope, identity: &str, path: &str) -> String {
  format!("{}:{}:{}", scope, identity, path)
}

/// Parent directory of a relative `/`-separated path (`""` for top-level entries).
pub fn parent_path(path: &str) -> &str {
  match path.trim_end_matches('/').rfind('/') {
    Some(idx) => &path[..idx],
    None => "",
  }
}

// ============================================================================
// Queue names
// ============================================================================

/// Polling priority. Encoded in queue names, never inside task records' ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  #[default]
  Medium,
  Low,
}

impl Priority {
  /// Strict polling order used by every processor.
  pub const POLL_ORDER: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::High => "high",
      Priority::Medium => "medium",
      Priority::Low => "low",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A family of priority-routed queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
  CacheUpdates,
  ContentProcessing,
  SearchIndexing,
}

impl Concern {
  pub fn as_str(&self) -> &'static str {
    match self {
      Concern::CacheUpdates => "cache-updates",
      Concern::ContentProcessing => "content-processing",
      Concern::SearchIndexing => "search-indexing",
    }
  }

  pub fn queue(&self, priority: Priority) -> String {
    format!("{}-{}", self.as_str(), priority)
  }

  /// Queue names in polling order (high, medium, low).
  pub fn queues(&self) -> [String; 3] {
    Priority::POLL_ORDER.map(|p| self.queue(p))
  }

  pub fn dead_letter_queue(&self) -> String {
    format!("{}-dead-letter", self.as_str())
  }
}

impl fmt::Display for Concern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

//! Cache Store - process-wide key/value store with point invalidation.
//!
//! `CacheStore` is what every component holds. It wraps a swappable
//! `CacheBackend` (in-memory or remote) and adds operation counters and an
//! observability event per call. Last write wins; there is no TTL and no
//! eviction beyond explicit deletes.

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

use super::remote::RemoteCache;
use crate::domain::config::{BackendKind, CacheConfig};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("Cache request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Invalid cache url: {0}")]
  InvalidUrl(String),
  #[error("Cache backend error: {0}")]
  Backend(String),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
  fn name(&self) -> &str;

  async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
  async fn put(&self, key: &str, value: Value) -> Result<(), CacheError>;
  async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

impl dyn CacheBackend {
  pub fn from_config(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, CacheError> {
    match config.backend {
      BackendKind::Memory => Ok(Arc::new(MemoryCache::new())),
      BackendKind::Remote => {
        let url = config
          .url
          .as_deref()
          .ok_or_else(|| CacheError::InvalidUrl("cache.url is not set".to_string()))?;
        Ok(Arc::new(RemoteCache::new(url)?))
      }
    }
  }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Unbounded in-process backend. Entries live until deleted.
pub struct MemoryCache {
  entries: Cache<String, Value>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self {
      entries: Cache::builder().build(),
    }
  }
}

impl Default for MemoryCache {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl CacheBackend for MemoryCache {
  fn name(&self) -> &str {
    "memory"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    Ok(self.entries.get(key).await)
  }

  async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
    self.entries.insert(key.to_string(), value).await;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    self.entries.invalidate(key).await;
    Ok(())
  }
}

// ============================================================================
// CacheStore
// ============================================================================

/// Operation counters reported by `GET /cache/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub backend: String,
  pub gets: u64,
  pub hits: u64,
  pub misses: u64,
  pub puts: u64,
  pub deletes: u64,
  pub errors: u64,
}

#[derive(Default)]
struct Counters {
  gets: AtomicU64,
  hits: AtomicU64,
  misses: AtomicU64,
  puts: AtomicU64,
  deletes: AtomicU64,
  errors: AtomicU64,
}

pub struct CacheStore {
  backend: Arc<dyn CacheBackend>,
  counters: Counters,
}

impl CacheStore {
  pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
    Self {
      backend,
      counters: Counters::default(),
    }
  }

  /// Store backed by an in-process map.
  pub fn memory() -> Self {
    Self::new(Arc::new(MemoryCache::new()))
  }

  pub fn backend_name(&self) -> &str {
    self.backend.name()
  }

  pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    self.counters.gets.fetch_add(1, Ordering::Relaxed);
    let result = self.backend.get(key).await;
    match &result {
      Ok(Some(_)) => {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        trace!(key, hit = true, "Cache get");
      }
      Ok(None) => {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key, hit = false, "Cache get");
      }
      Err(e) => self.failed("get", key, e),
    }
    result
  }

  pub async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
    self.counters.puts.fetch_add(1, Ordering::Relaxed);
    let result = self.backend.put(key, value).await;
    match &result {
      Ok(()) => trace!(key, "Cache put"),
      Err(e) => self.failed("put", key, e),
    }
    result
  }

  pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
    self.counters.deletes.fetch_add(1, Ordering::Relaxed);
    let result = self.backend.delete(key).await;
    match &result {
      Ok(()) => trace!(key, "Cache delete"),
      Err(e) => self.failed("delete", key, e),
    }
    result
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      backend: self.backend.name().to_string(),
      gets: self.counters.gets.load(Ordering::Relaxed),
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      puts: self.counters.puts.load(Ordering::Relaxed),
      deletes: self.counters.deletes.load(Ordering::Relaxed),
      errors: self.counters.errors.load(Ordering::Relaxed),
    }
  }

  fn failed(&self, op: &str, key: &str, error: &CacheError) {
    self.counters.errors.fetch_add(1, Ordering::Relaxed);
    warn!(op, key, error = %error, "Cache operation failed");
  }
}

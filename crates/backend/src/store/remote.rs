//! Network-backed store clients.
//!
//! These talk to another docsync instance's HTTP surface, so several processes
//! can share one queue and cache store. The wire contract is the one served by
//! `server.rs`.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, trace};

use super::{
  cache::{CacheBackend, CacheError},
  queue::{QueueError, QueueStatsEntry, QueueStore},
};

/// Base URL plus a shared connection pool.
#[derive(Debug, Clone)]
struct Endpoint {
  client: reqwest::Client,
  base: Url,
}

impl Endpoint {
  fn new(base_url: &str) -> Result<Self, String> {
    let base = Url::parse(base_url).map_err(|e| format!("{}: {}", base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(format!("{}: not a base url", base_url));
    }
    Ok(Self {
      client: reqwest::Client::new(),
      base,
    })
  }

  /// `{base}/{route...}/{tail}` with every segment percent-encoded. `tail` keeps
  /// its `/` separators so cache keys map onto the wildcard route.
  fn url(&self, route: &[&str], tail: &str) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().extend(route).extend(tail.split('/'));
    }
    url
  }
}

/// Pass 2xx replies through; otherwise the server's `{"error"}` text and the status.
async fn accepted(response: reqwest::Response) -> Result<reqwest::Response, String> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body: Value = response.json().await.unwrap_or_default();
  let reason = body["error"].as_str().unwrap_or("no details");
  Err(format!("{} ({})", reason, status))
}

/// Probe `GET {base}/{service}/status` and return the liveness string.
pub async fn fetch_status(client: &reqwest::Client, base_url: &str, service: &str) -> Result<String, reqwest::Error> {
  let url = format!("{}/{}/status", base_url.trim_end_matches('/'), service);
  client.get(url).send().await?.error_for_status()?.text().await
}

// ============================================================================
// Queue client
// ============================================================================

pub struct RemoteQueue {
  endpoint: Endpoint,
}

impl RemoteQueue {
  pub fn new(base_url: &str) -> Result<Self, QueueError> {
    let endpoint = Endpoint::new(base_url).map_err(QueueError::InvalidUrl)?;
    debug!(url = %endpoint.base, "Remote queue store configured");
    Ok(Self { endpoint })
  }
}

#[async_trait]
impl QueueStore for RemoteQueue {
  fn name(&self) -> &str {
    "remote"
  }

  async fn enqueue(&self, queue: &str, item: Value) -> Result<(), QueueError> {
    let url = self.endpoint.url(&["queue", "enqueue"], queue);
    let response = self.endpoint.client.post(url).json(&item).send().await?;
    accepted(response).await.map_err(QueueError::Backend)?;
    trace!(queue, "Enqueued (remote)");
    Ok(())
  }

  async fn dequeue(&self, queue: &str) -> Result<Option<Value>, QueueError> {
    let url = self.endpoint.url(&["queue", "dequeue"], queue);
    let response = self.endpoint.client.get(url).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let item: Value = accepted(response).await.map_err(QueueError::Backend)?.json().await?;
    trace!(queue, "Dequeued (remote)");
    Ok(Some(item))
  }

  async fn size(&self, queue: &str) -> Result<usize, QueueError> {
    let url = self.endpoint.url(&["queue", "size"], queue);
    let response = self.endpoint.client.get(url).send().await?;
    Ok(accepted(response).await.map_err(QueueError::Backend)?.json().await?)
  }

  async fn stats(&self) -> Result<Vec<QueueStatsEntry>, QueueError> {
    let url = self.endpoint.url(&["queue"], "stats");
    let response = self.endpoint.client.get(url).send().await?;
    Ok(accepted(response).await.map_err(QueueError::Backend)?.json().await?)
  }
}

// ============================================================================
// Cache client
// ============================================================================

pub struct RemoteCache {
  endpoint: Endpoint,
}

impl RemoteCache {
  pub fn new(base_url: &str) -> Result<Self, CacheError> {
    let endpoint = Endpoint::new(base_url).map_err(CacheError::InvalidUrl)?;
    debug!(url = %endpoint.base, "Remote cache backend configured");
    Ok(Self { endpoint })
  }
}

#[async_trait]
impl CacheBackend for RemoteCache {
  fn name(&self) -> &str {
    "remote"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    let url = self.endpoint.url(&["cache", "get"], key);
    let response = self.endpoint.client.get(url).send().await?;
    let value: Value = accepted(response).await.map_err(CacheError::Backend)?.json().await?;
    Ok(match value {
      Value::Null => None,
      value => Some(value),
    })
  }

  async fn put(&self, key: &str, value: Value) -> Result<(), CacheError> {
    let url = self.endpoint.url(&["cache", "put"], key);
    let response = self.endpoint.client.post(url).json(&value).send().await?;
    accepted(response).await.map_err(CacheError::Backend)?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    let url = self.endpoint.url(&["cache", "delete"], key);
    let response = self.endpoint.client.delete(url).send().await?;
    accepted(response).await.map_err(CacheError::Backend)?;
    Ok(())
  }
}

//! Task scripts - named units of work the engine can run.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Failure reported by a script. The message is what `onStatus` receives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

impl ScriptError {
  pub fn new(message: impl fmt::Display) -> Self {
    Self(message.to_string())
  }
}

/// A unit of work run to completion by a `TaskEngine`.
///
/// Long-running scripts (workers, the watcher) must return once `cancel` fires.
#[async_trait]
pub trait TaskScript: Send + Sync {
  async fn run(&self, data: Value, cancel: CancellationToken) -> Result<Value, ScriptError>;
}

/// Adapter turning an async closure into a `TaskScript`.
pub struct FnScript<F>(F);

#[async_trait]
impl<F, Fut> TaskScript for FnScript<F>
where
  F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, ScriptError>> + Send + 'static,
{
  async fn run(&self, data: Value, cancel: CancellationToken) -> Result<Value, ScriptError> {
    (self.0)(data, cancel).await
  }
}

pub fn script_fn<F, Fut>(f: F) -> Arc<dyn TaskScript>
where
  F: Fn(Value, CancellationToken) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Value, ScriptError>> + Send + 'static,
{
  Arc::new(FnScript(f))
}

/// Script references resolved by name.
#[derive(Default, Clone)]
pub struct ScriptRegistry {
  scripts: HashMap<String, Arc<dyn TaskScript>>,
}

impl ScriptRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, name: impl Into<String>, script: Arc<dyn TaskScript>) {
    self.scripts.insert(name.into(), script);
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn TaskScript>> {
    self.scripts.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.scripts.contains_key(name)
  }

  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}

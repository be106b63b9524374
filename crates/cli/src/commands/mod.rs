//! CLI command implementations

mod admin;
mod daemon;
mod inspect;

use std::path::Path;

use anyhow::{Context, Result, bail};
use docsync::config::Config;
use serde::de::DeserializeOwned;

pub use admin::{cmd_config_init, cmd_config_show, cmd_status};
pub use daemon::cmd_daemon;
pub use inspect::{
  cmd_cache_get, cmd_queue_size, cmd_queue_stats, cmd_schedule_add, cmd_schedule_cancel, cmd_schedule_list,
  cmd_search,
};

/// `--url`, else the configured bind address.
fn base_url(config: Option<&Path>, url: Option<&str>) -> Result<String> {
  if let Some(url) = url {
    return Ok(url.trim_end_matches('/').to_string());
  }
  let config = Config::load(config).context("Failed to load config")?;
  Ok(config.server.base_url())
}

/// Decode a successful response, or turn the `{error}` body into a failure.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
  let status = response.status();
  if !status.is_success() {
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("request failed");
    bail!("{} ({})", message, status);
  }
  response.json().await.context("Invalid response body")
}

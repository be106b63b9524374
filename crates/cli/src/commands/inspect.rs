//! Thin HTTP clients over the daemon's queue, cache, search and scheduler routes

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::{base_url, read_json};

pub async fn cmd_queue_size(config: Option<&Path>, url: Option<&str>, name: &str) -> Result<()> {
  let base = base_url(config, url)?;
  let response = reqwest::get(format!("{}/queue/size/{}", base, name))
    .await
    .context("Failed to reach daemon")?;
  let size: usize = read_json(response).await?;
  println!("{}", size);
  Ok(())
}

pub async fn cmd_queue_stats(config: Option<&Path>, url: Option<&str>) -> Result<()> {
  let base = base_url(config, url)?;
  let response = reqwest::get(format!("{}/queue/stats", base))
    .await
    .context("Failed to reach daemon")?;
  let stats: Vec<Value> = read_json(response).await?;

  if stats.is_empty() {
    println!("No queue activity yet.");
    return Ok(());
  }
  println!("{:<32} {:>7} {:>9} {:>9}", "QUEUE", "DEPTH", "ENQUEUED", "DEQUEUED");
  for entry in stats {
    println!(
      "{:<32} {:>7} {:>9} {:>9}",
      entry["queue"].as_str().unwrap_or("?"),
      entry["depth"],
      entry["enqueued"],
      entry["dequeued"]
    );
  }
  Ok(())
}

pub async fn cmd_cache_get(config: Option<&Path>, url: Option<&str>, key: &str) -> Result<()> {
  let base = base_url(config, url)?;
  let response = reqwest::get(format!("{}/cache/get/{}", base, key))
    .await
    .context("Failed to reach daemon")?;
  let value: Value = read_json(response).await?;
  println!("{}", serde_json::to_string_pretty(&value)?);
  Ok(())
}

pub async fn cmd_search(
  config: Option<&Path>,
  url: Option<&str>,
  query: &str,
  scope: Option<&str>,
  identity: Option<&str>,
  limit: usize,
  json: bool,
) -> Result<()> {
  let base = base_url(config, url)?;
  let mut params = vec![("q", query.to_string()), ("limit", limit.to_string())];
  if let Some(scope) = scope {
    params.push(("scope", scope.to_string()));
  }
  if let Some(identity) = identity {
    params.push(("identity", identity.to_string()));
  }

  let response = reqwest::Client::new()
    .get(format!("{}/search/query", base))
    .query(&params)
    .send()
    .await
    .context("Failed to reach daemon")?;
  let hits: Vec<Value> = read_json(response).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&hits)?);
    return Ok(());
  }
  if hits.is_empty() {
    println!("No matches.");
    return Ok(());
  }
  for hit in hits {
    let title = hit["metadata"]["title"].as_str().unwrap_or("");
    println!(
      "[{}] {}:{}  {}",
      hit["score"],
      hit["identity"].as_str().unwrap_or("?"),
      hit["path"].as_str().unwrap_or("?"),
      title
    );
  }
  Ok(())
}

pub async fn cmd_schedule_add(
  config: Option<&Path>,
  url: Option<&str>,
  task: &str,
  every: Option<u64>,
  cron: Option<&str>,
  script: Option<&str>,
) -> Result<()> {
  let base = base_url(config, url)?;
  let mut body = json!({ "task": task });
  match (every, cron) {
    (Some(secs), _) => body["intervalSeconds"] = json!(secs),
    (None, Some(expr)) => body["cron"] = json!(expr),
    (None, None) => anyhow::bail!("either --every or --cron is required"),
  }
  if let Some(script) = script {
    body["script"] = json!(script);
  }

  let response = reqwest::Client::new()
    .post(format!("{}/scheduler/schedule", base))
    .json(&body)
    .send()
    .await
    .context("Failed to reach daemon")?;
  let _: Value = read_json(response).await?;
  println!("Scheduled {}", task);
  Ok(())
}

pub async fn cmd_schedule_cancel(config: Option<&Path>, url: Option<&str>, task: &str) -> Result<()> {
  let base = base_url(config, url)?;
  let response = reqwest::Client::new()
    .delete(format!("{}/scheduler/cancel/{}", base, task))
    .send()
    .await
    .context("Failed to reach daemon")?;
  let _: Value = read_json(response).await?;
  println!("Cancelled {}", task);
  Ok(())
}

pub async fn cmd_schedule_list(config: Option<&Path>, url: Option<&str>) -> Result<()> {
  let base = base_url(config, url)?;
  let response = reqwest::get(format!("{}/scheduler/tasks", base))
    .await
    .context("Failed to reach daemon")?;
  let tasks: Vec<Value> = read_json(response).await?;

  if tasks.is_empty() {
    println!("No scheduled tasks.");
    return Ok(());
  }
  println!("{:<20} {:<20} {:<10} {:>6}  CADENCE", "TASK", "SCRIPT", "STATE", "RUNS");
  for task in tasks {
    println!(
      "{:<20} {:<20} {:<10} {:>6}  {}",
      task["task"].as_str().unwrap_or("?"),
      task["script"].as_str().unwrap_or("?"),
      task["state"].as_str().unwrap_or("?"),
      task["stats"]["executions"].as_u64().unwrap_or(0),
      task["cadence"]
    );
  }
  Ok(())
}

//! HTTP surface over the stores, the scheduler and the search index.
//!
//! This is the external seam: in-process components call the stores directly,
//! while other processes (and `RemoteQueue` / `RemoteCache`) use these routes.
//!
//! # Routes
//!
//! - `POST /queue/enqueue/{name}`, `GET /queue/dequeue/{name}` (404 when empty),
//!   `GET /queue/size/{name}`, `GET /queue/stats`
//! - `POST /cache/put/{*key}`, `GET /cache/get/{*key}` (value or `null`),
//!   `DELETE /cache/delete/{*key}`, `GET /cache/stats`
//! - `POST /scheduler/schedule`, `DELETE /scheduler/cancel/{task}`, `GET /scheduler/tasks`
//! - `GET /search/query?q=&scope=&identity=&limit=`
//! - `GET /{service}/status` for every service above

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  exec::{Cadence, Schedule, Scheduler, SchedulerError},
  search::{SearchError, SearchIndex, SearchQuery},
  store::{CacheError, CacheStore, QueueError, QueueStore},
};

/// Body of `GET /{service}/status`.
pub const STATUS_OK: &str = "OK";

/// Services probed by the readiness wait loop.
pub const SERVICES: [&str; 4] = ["queue", "cache", "scheduler", "search"];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Conflict(String),
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  Backend(String),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Backend(message) => {
        warn!(error = %message, "Backend failure");
        StatusCode::BAD_GATEWAY
      }
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

impl From<QueueError> for ApiError {
  fn from(e: QueueError) -> Self {
    ApiError::Backend(e.to_string())
  }
}

impl From<CacheError> for ApiError {
  fn from(e: CacheError) -> Self {
    ApiError::Backend(e.to_string())
  }
}

impl From<SearchError> for ApiError {
  fn from(e: SearchError) -> Self {
    ApiError::BadRequest(e.to_string())
  }
}

impl From<SchedulerError> for ApiError {
  fn from(e: SchedulerError) -> Self {
    match e {
      SchedulerError::AlreadyScheduled(_) => ApiError::Conflict(e.to_string()),
      SchedulerError::NotScheduled(_) | SchedulerError::UnknownScript(_) => ApiError::NotFound(e.to_string()),
      SchedulerError::InvalidCron(_) | SchedulerError::ZeroInterval => ApiError::BadRequest(e.to_string()),
    }
  }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Server
// ============================================================================

/// Everything the routes operate on, shared by every request.
#[derive(Clone)]
pub struct Services {
  pub queue: Arc<dyn QueueStore>,
  pub cache: Arc<CacheStore>,
  pub scheduler: Arc<Scheduler>,
  pub search: Arc<dyn SearchIndex>,
}

pub struct Server {
  services: Services,
}

impl Server {
  pub fn new(services: Services) -> Self {
    Self { services }
  }

  pub fn router(&self) -> Router {
    Router::new()
      .route("/queue/enqueue/{name}", post(enqueue))
      .route("/queue/dequeue/{name}", get(dequeue))
      .route("/queue/size/{name}", get(queue_size))
      .route("/queue/stats", get(queue_stats))
      .route("/cache/put/{*key}", post(cache_put))
      .route("/cache/get/{*key}", get(cache_get))
      .route("/cache/delete/{*key}", delete(cache_delete))
      .route("/cache/stats", get(cache_stats))
      .route("/scheduler/schedule", post(schedule))
      .route("/scheduler/cancel/{task}", delete(cancel_schedule))
      .route("/scheduler/tasks", get(scheduled_tasks))
      .route("/search/query", get(search_query))
      .route("/{service}/status", get(status))
      .with_state(self.services.clone())
  }

  /// Serve on `listener` until `cancel` fires; in-flight requests are drained.
  pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
      info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, self.router())
      .with_graceful_shutdown(cancel.cancelled_owned())
      .await?;
    info!("HTTP server stopped");
    Ok(())
  }
}

// ============================================================================
// Queue routes
// ============================================================================

async fn enqueue(State(s): State<Services>, Path(name): Path<String>, Json(item): Json<Value>) -> ApiResult<StatusCode> {
  s.queue.enqueue(&name, item).await?;
  Ok(StatusCode::OK)
}

async fn dequeue(State(s): State<Services>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
  match s.queue.dequeue(&name).await? {
    Some(item) => Ok(Json(item)),
    None => Err(ApiError::NotFound(format!("Queue '{}' is empty", name))),
  }
}

async fn queue_size(State(s): State<Services>, Path(name): Path<String>) -> ApiResult<Json<usize>> {
  Ok(Json(s.queue.size(&name).await?))
}

async fn queue_stats(State(s): State<Services>) -> ApiResult<impl IntoResponse> {
  Ok(Json(s.queue.stats().await?))
}

// ============================================================================
// Cache routes
// ============================================================================

async fn cache_put(State(s): State<Services>, Path(key): Path<String>, Json(value): Json<Value>) -> ApiResult<StatusCode> {
  s.cache.put(&key, value).await?;
  Ok(StatusCode::OK)
}

async fn cache_get(State(s): State<Services>, Path(key): Path<String>) -> ApiResult<Json<Value>> {
  Ok(Json(s.cache.get(&key).await?.unwrap_or(Value::Null)))
}

async fn cache_delete(State(s): State<Services>, Path(key): Path<String>) -> ApiResult<StatusCode> {
  s.cache.delete(&key).await?;
  Ok(StatusCode::OK)
}

async fn cache_stats(State(s): State<Services>) -> impl IntoResponse {
  Json(s.cache.stats())
}

// ============================================================================
// Scheduler routes
// ============================================================================

/// `{task, cron | intervalSeconds, script?, data?}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
  pub task: String,
  #[serde(flatten)]
  pub cadence: Cadence,
  pub script: Option<String>,
  pub data: Option<Value>,
}

async fn schedule(State(s): State<Services>, Json(request): Json<ScheduleRequest>) -> ApiResult<Json<Value>> {
  debug!(task = %request.task, cadence = ?request.cadence, "Schedule request");
  let mut schedule = Schedule::new(request.task.clone(), request.cadence);
  if let Some(script) = request.script {
    schedule = schedule.script(script);
  }
  if let Some(data) = request.data {
    schedule = schedule.data(data);
  }
  s.scheduler.start(schedule)?;
  Ok(Json(json!({ "scheduled": request.task })))
}

async fn cancel_schedule(State(s): State<Services>, Path(task): Path<String>) -> ApiResult<Json<Value>> {
  s.scheduler.cancel(Some(&task))?;
  Ok(Json(json!({ "cancelled": task })))
}

async fn scheduled_tasks(State(s): State<Services>) -> impl IntoResponse {
  Json(s.scheduler.list())
}

// ============================================================================
// Search and status routes
// ============================================================================

async fn search_query(State(s): State<Services>, Query(query): Query<SearchQuery>) -> ApiResult<impl IntoResponse> {
  Ok(Json(s.search.search(&query).await?))
}

async fn status(Path(service): Path<String>) -> ApiResult<&'static str> {
  if SERVICES.contains(&service.as_str()) {
    Ok(STATUS_OK)
  } else {
    Err(ApiError::NotFound(format!("Unknown service '{}'", service)))
  }
}

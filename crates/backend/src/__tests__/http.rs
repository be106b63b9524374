//! HTTP surface served on an ephemeral port and driven with reqwest, plus the
//! network-backed store clients talking to it.

use std::{net::SocketAddr, sync::Arc};

use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
  config::Config,
  domain::keys::Owner,
  exec::{ScriptRegistry, Scheduler, script_fn},
  search::{MemorySearchIndex, SearchDocument},
  server::{SERVICES, STATUS_OK, Server, Services},
  store::{
    CacheBackend, CacheError, CacheStore, MemoryQueue, QueueError, QueueStore, RemoteCache, RemoteQueue, fetch_status,
  },
};

struct TestServer {
  base: String,
  services: Services,
  cancel: CancellationToken,
  client: reqwest::Client,
}

impl TestServer {
  async fn start() -> Self {
    let mut registry = ScriptRegistry::new();
    registry.register(
      "noop",
      script_fn(|_, cancel| async move {
        cancel.cancelled().await;
        Ok(Value::Null)
      }),
    );

    let cancel = CancellationToken::new();
    let services = Services {
      queue: Arc::new(MemoryQueue::default()),
      cache: Arc::new(CacheStore::memory()),
      scheduler: Arc::new(Scheduler::new(
        Arc::new(registry),
        Config::default().scheduler,
        cancel.child_token(),
      )),
      search: MemorySearchIndex::shared(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = Server::new(services.clone());
    let server_cancel = cancel.child_token();
    tokio::spawn(async move { server.run(listener, server_cancel).await });

    Self {
      base: format!("http://{}", addr),
      services,
      cancel,
      client: reqwest::Client::new(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base, path)
  }
}

impl Drop for TestServer {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

#[tokio::test]
async fn test_queue_routes() {
  let server = TestServer::start().await;
  let client = &server.client;

  for n in 1..=3 {
    let response = client
      .post(server.url("/queue/enqueue/jobs"))
      .json(&json!({ "n": n }))
      .send()
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }

  let size: usize = client.get(server.url("/queue/size/jobs")).send().await.unwrap().json().await.unwrap();
  assert_eq!(size, 3);

  for n in 1..=3 {
    let item: Value = client.get(server.url("/queue/dequeue/jobs")).send().await.unwrap().json().await.unwrap();
    assert_eq!(item, json!({ "n": n }));
  }

  let empty = client.get(server.url("/queue/dequeue/jobs")).send().await.unwrap();
  assert_eq!(empty.status(), StatusCode::NOT_FOUND);

  let stats: Value = client.get(server.url("/queue/stats")).send().await.unwrap().json().await.unwrap();
  assert_eq!(stats[0]["queue"], "jobs");
  assert_eq!(stats[0]["enqueued"], 3);
  assert_eq!(stats[0]["dequeued"], 3);
}

#[tokio::test]
async fn test_cache_routes_with_structured_keys() {
  let server = TestServer::start().await;
  let client = &server.client;
  let key = "personal:alice:content:notes/today.md";

  let response = client
    .post(server.url(&format!("/cache/put/{}", key)))
    .json(&json!({"text": "hi"}))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    server.services.cache.get(key).await.unwrap(),
    Some(json!({"text": "hi"}))
  );

  let value: Value = client
    .get(server.url(&format!("/cache/get/{}", key)))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(value, json!({"text": "hi"}));

  let response = client.delete(server.url(&format!("/cache/delete/{}", key))).send().await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let value: Value = client
    .get(server.url(&format!("/cache/get/{}", key)))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(value, Value::Null);

  let stats: Value = client.get(server.url("/cache/stats")).send().await.unwrap().json().await.unwrap();
  assert_eq!(stats["backend"], "memory");
  assert_eq!(stats["puts"], 1);
  assert_eq!(stats["deletes"], 1);
}

#[tokio::test]
async fn test_scheduler_routes() {
  let server = TestServer::start().await;
  let client = &server.client;

  let schedule = json!({"task": "ticker", "intervalSeconds": 60, "script": "noop"});
  let response = client.post(server.url("/scheduler/schedule")).json(&schedule).send().await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert!(server.services.scheduler.is_scheduled("ticker"));

  let duplicate = client.post(server.url("/scheduler/schedule")).json(&schedule).send().await.unwrap();
  assert_eq!(duplicate.status(), StatusCode::CONFLICT);

  let unknown = client
    .post(server.url("/scheduler/schedule"))
    .json(&json!({"task": "mystery", "intervalSeconds": 5}))
    .send()
    .await
    .unwrap();
  assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

  let bad_cron = client
    .post(server.url("/scheduler/schedule"))
    .json(&json!({"task": "nightly", "cron": "not cron", "script": "noop"}))
    .send()
    .await
    .unwrap();
  assert_eq!(bad_cron.status(), StatusCode::BAD_REQUEST);

  let tasks: Value = client.get(server.url("/scheduler/tasks")).send().await.unwrap().json().await.unwrap();
  assert_eq!(tasks[0]["task"], "ticker");
  assert_eq!(tasks[0]["script"], "noop");
  assert_eq!(tasks[0]["cadence"], json!({"intervalSeconds": 60}));

  let cancelled = client.delete(server.url("/scheduler/cancel/ticker")).send().await.unwrap();
  assert_eq!(cancelled.status(), StatusCode::OK);
  assert!(!server.services.scheduler.is_scheduled("ticker"));

  let again = client.delete(server.url("/scheduler/cancel/ticker")).send().await.unwrap();
  assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_query_route() {
  let server = TestServer::start().await;
  let search = &server.services.search;
  search
    .add(SearchDocument::new(&Owner::personal("alice"), "a.md", "turnip soup", json!({})))
    .await
    .unwrap();
  search
    .add(SearchDocument::new(&Owner::space("kitchen"), "b.md", "turnip cake", json!({})))
    .await
    .unwrap();

  let hits: Value = server
    .client
    .get(server.url("/search/query?q=turnip&scope=git"))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
  assert_eq!(hits.as_array().unwrap().len(), 1);
  assert_eq!(hits[0]["id"], "git:kitchen:b.md");
}

#[tokio::test]
async fn test_status_probes() {
  let server = TestServer::start().await;

  for service in SERVICES {
    let body = fetch_status(&server.client, &server.base, service).await.unwrap();
    assert_eq!(body, STATUS_OK);
  }

  let unknown = server.client.get(server.url("/nope/status")).send().await.unwrap();
  assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remote_clients_round_trip() {
  let server = TestServer::start().await;

  let queue = RemoteQueue::new(&server.base).unwrap();
  queue.enqueue("cache-updates-high", json!({"a": 1})).await.unwrap();
  queue.enqueue("cache-updates-high", json!({"a": 2})).await.unwrap();
  assert_eq!(queue.size("cache-updates-high").await.unwrap(), 2);
  assert_eq!(queue.dequeue("cache-updates-high").await.unwrap(), Some(json!({"a": 1})));
  assert_eq!(queue.dequeue("cache-updates-high").await.unwrap(), Some(json!({"a": 2})));
  assert_eq!(queue.dequeue("cache-updates-high").await.unwrap(), None);
  assert_eq!(queue.stats().await.unwrap()[0].queue, "cache-updates-high");

  let cache = CacheStore::new(Arc::new(RemoteCache::new(&server.base).unwrap()));
  let key = "git:projectX:meta:docs/read me.md";
  cache.put(key, json!({"title": "Read me"})).await.unwrap();
  assert_eq!(
    server.services.cache.get(key).await.unwrap(),
    Some(json!({"title": "Read me"}))
  );
  assert_eq!(cache.get(key).await.unwrap(), Some(json!({"title": "Read me"})));
  cache.delete(key).await.unwrap();
  assert_eq!(cache.get(key).await.unwrap(), None);
  assert_eq!(cache.stats().backend, "remote");
}

#[tokio::test]
async fn test_unreachable_remote_store_errors() {
  // Bind then drop to get a port nobody listens on
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  drop(listener);

  let queue = RemoteQueue::new(&format!("http://{}", addr)).unwrap();
  assert!(queue.dequeue("file-events").await.is_err());

  let cache = RemoteCache::new(&format!("http://{}", addr)).unwrap();
  assert!(cache.get("k").await.is_err());
}

#[tokio::test]
async fn test_remote_rejections_are_backend_errors() {
  let server = TestServer::start().await;
  // Reachable, but nothing is routed under this prefix
  let base = format!("{}/elsewhere", server.base);

  let queue = RemoteQueue::new(&base).unwrap();
  let err = queue.enqueue("file-events", json!({"a": 1})).await.unwrap_err();
  assert!(
    matches!(&err, QueueError::Backend(reason) if reason.contains("404")),
    "unexpected error: {err}"
  );

  let cache = RemoteCache::new(&base).unwrap();
  let err = cache.put("personal:alice:meta:a.md", json!({})).await.unwrap_err();
  assert!(
    matches!(&err, CacheError::Backend(reason) if reason.contains("404")),
    "unexpected error: {err}"
  );
}

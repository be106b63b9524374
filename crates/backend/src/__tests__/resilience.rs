//! Worker behavior under bad input, priority contention and shutdown.

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::{
  config::Config,
  domain::{
    config::WorkersConfig,
    keys::{Concern, Owner, Priority},
    task::{self, CacheTask},
  },
  store::{CacheStore, MemoryQueue, QueueStore},
  worker::{CacheProcessor, Poll, Worker},
};

fn cache_worker(config: WorkersConfig) -> (Worker, Arc<dyn QueueStore>, Arc<CacheStore>) {
  let queue: Arc<dyn QueueStore> = Arc::new(MemoryQueue::default());
  let cache = Arc::new(CacheStore::memory());
  let worker = Worker::new(Arc::new(CacheProcessor::new(cache.clone())), queue.clone(), config);
  (worker, queue, cache)
}

fn write(owner: &Owner, path: &str, content: &str) -> Value {
  task::encode(&CacheTask::update(owner, path, Some(json!(content)), json!({}))).unwrap()
}

#[tokio::test]
async fn test_high_items_drain_before_low() {
  let (mut worker, queue, cache) = cache_worker(WorkersConfig::default());
  let alice = Owner::personal("alice");
  let high = Concern::CacheUpdates.queue(Priority::High);
  let low = Concern::CacheUpdates.queue(Priority::Low);

  // low was enqueued first, yet must be processed last
  queue.enqueue(&low, write(&alice, "a.md", "low")).await.unwrap();
  for n in ["h1", "h2", "h3"] {
    queue.enqueue(&high, write(&alice, "a.md", n)).await.unwrap();
  }

  for _ in 0..3 {
    assert_eq!(worker.poll_once().await, Poll::Processed);
  }
  assert_eq!(cache.get("personal:alice:content:a.md").await.unwrap(), Some(json!("h3")));
  assert_eq!(queue.size(&low).await.unwrap(), 1);

  assert_eq!(worker.poll_once().await, Poll::Processed);
  assert_eq!(cache.get("personal:alice:content:a.md").await.unwrap(), Some(json!("low")));
  assert_eq!(worker.poll_once().await, Poll::Idle);
}

#[tokio::test]
async fn test_bad_item_does_not_block_queue() {
  let (mut worker, queue, cache) = cache_worker(WorkersConfig::default());
  let high = Concern::CacheUpdates.queue(Priority::High);

  queue.enqueue(&high, json!({"action": "update", "path": "orphan.md"})).await.unwrap();
  queue.enqueue(&high, json!("not even an object")).await.unwrap();
  queue
    .enqueue(&high, write(&Owner::space("projectX"), "readme.md", "ok"))
    .await
    .unwrap();

  assert_eq!(worker.poll_once().await, Poll::Failed);
  assert_eq!(worker.poll_once().await, Poll::Failed);
  assert_eq!(worker.poll_once().await, Poll::Processed);

  assert_eq!(cache.get("git:projectX:content:readme.md").await.unwrap(), Some(json!("ok")));
  assert_eq!(
    queue.size(&Concern::CacheUpdates.dead_letter_queue()).await.unwrap(),
    2
  );
}

#[tokio::test]
async fn test_running_worker_survives_failures() {
  let config = WorkersConfig {
    idle_poll_ms: 10,
    error_backoff_ms: 10,
    ..Config::default().workers
  };
  let (worker, queue, cache) = cache_worker(config);
  let medium = Concern::CacheUpdates.queue(Priority::Medium);

  queue.enqueue(&medium, json!({"garbage": true})).await.unwrap();
  queue
    .enqueue(&medium, write(&Owner::personal("bob"), "b.md", "fine"))
    .await
    .unwrap();

  let cancel = CancellationToken::new();
  let handle = tokio::spawn(worker.run(cancel.clone()));

  let mut written = false;
  for _ in 0..100 {
    if cache.get("personal:bob:content:b.md").await.unwrap().is_some() {
      written = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(written);

  cancel.cancel();
  let stats = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
  assert_eq!(stats.processed, 1);
  assert_eq!(stats.dead_lettered, 1);
}

//! End-to-end scenarios: filesystem change to cache and search state.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::helpers::{PipelineContext, eventually};
use crate::domain::keys::FILE_EVENTS_QUEUE;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_file_populates_cache_and_search() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  std::fs::write(ctx.alice("notes/a.md"), "# Groceries\n\nBuy **turnips** and milk").unwrap();

  let queue = ctx.daemon.services.queue.clone();
  assert!(
    eventually(TIMEOUT, || {
      let queue = queue.clone();
      async move { queue.size(FILE_EVENTS_QUEUE).await.unwrap() >= 1 }
    })
    .await,
    "raw event should land on file-events"
  );

  let event = queue.dequeue(FILE_EVENTS_QUEUE).await.unwrap().unwrap();
  assert_eq!(event["action"], "add");
  assert_eq!(event["path"], "notes/a.md");
  assert_eq!(event["username"], "alice");
  assert_eq!(event["priority"], "medium");
  assert_eq!(event["isDirectory"], false);

  let populated = eventually(TIMEOUT, move || async move {
    ctx.cached("personal:alice:content:notes/a.md").await.is_some()
      && ctx.cached("personal:alice:meta:notes/a.md").await.is_some()
      && !ctx.search_ids("turnips").await.is_empty()
  })
  .await;
  assert!(populated, "content, meta and search entry should appear");

  assert_eq!(
    ctx.cached("personal:alice:content:notes/a.md").await,
    Some(json!("# Groceries\n\nBuy **turnips** and milk"))
  );
  let meta = ctx.cached("personal:alice:meta:notes/a.md").await.unwrap();
  assert_eq!(meta["title"], "Groceries");
  assert_eq!(meta["kind"], "markdown");
  assert_eq!(ctx.search_ids("turnips").await, vec!["personal:alice:notes/a.md".to_string()]);

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deleted_file_clears_cache_and_search() {
  let context = PipelineContext::start().await;
  let ctx = &context;
  let file = ctx.alice("notes/a.md");

  std::fs::write(&file, "parsnips").unwrap();
  assert!(
    eventually(TIMEOUT, move || async move {
      ctx.cached("personal:alice:meta:notes/a.md").await.is_some() && !ctx.search_ids("parsnips").await.is_empty()
    })
    .await,
    "file should be indexed first"
  );

  // listing entries an API layer would have cached
  let cache = ctx.daemon.services.cache.clone();
  cache.put("personal:alice:tree:notes/a.md", json!([])).await.unwrap();
  cache.put("personal:alice:list:notes/a.md", json!([])).await.unwrap();
  cache.put("personal:alice:list:notes", json!(["a.md"])).await.unwrap();

  std::fs::remove_file(&file).unwrap();

  let cleared = eventually(TIMEOUT, move || async move {
    let mut absent = true;
    for kind in ["content", "meta", "tree", "list"] {
      absent &= ctx.cached(&format!("personal:alice:{}:notes/a.md", kind)).await.is_none();
    }
    absent && ctx.search_ids("parsnips").await.is_empty()
  })
  .await;
  assert!(cleared, "every key and the search entry should be removed");
  assert_eq!(ctx.cached("personal:alice:list:notes").await, None);

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_config_change_is_high_priority() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  std::fs::write(ctx.alice("settings.json"), r#"{"theme":"dark"}"#).unwrap();

  let queue = ctx.daemon.services.queue.clone();
  assert!(
    eventually(TIMEOUT, || {
      let queue = queue.clone();
      async move { queue.size(FILE_EVENTS_QUEUE).await.unwrap() >= 1 }
    })
    .await
  );
  let event = queue.dequeue(FILE_EVENTS_QUEUE).await.unwrap().unwrap();
  assert_eq!(event["priority"], "high");

  assert!(
    eventually(TIMEOUT, move || async move {
      ctx.cached("personal:alice:meta:settings.json").await.is_some()
    })
    .await
  );
  let content = ctx.cached("personal:alice:content:settings.json").await.unwrap();
  assert_eq!(content, json!(r#"{"theme":"dark"}"#));

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignored_files_never_reach_the_queues() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  std::fs::write(ctx.alice("notes/.a.md.swp"), "swap").unwrap();
  std::fs::write(ctx.alice("notes/draft.tmp"), "tmp").unwrap();
  std::fs::write(ctx.alice("notes/real.md"), "real").unwrap();

  let queue = ctx.daemon.services.queue.clone();
  assert!(
    eventually(TIMEOUT, move || async move { ctx.cached("personal:alice:meta:notes/real.md").await.is_some() }).await
  );

  let mut paths = Vec::new();
  while let Some(event) = queue.dequeue(FILE_EVENTS_QUEUE).await.unwrap() {
    paths.push(event["path"].as_str().unwrap().to_string());
  }
  assert_eq!(paths, vec!["notes/real.md".to_string()]);

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_renamed_directory_moves_cache_and_search_entries() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  std::fs::create_dir_all(ctx.alice("proj")).unwrap();
  std::fs::write(ctx.alice("proj/x.md"), "# Plan\n\nplant zucchini").unwrap();
  assert!(
    eventually(TIMEOUT, move || async move {
      ctx.cached("personal:alice:meta:proj/x.md").await.is_some() && !ctx.search_ids("zucchini").await.is_empty()
    })
    .await,
    "file should be indexed under its original directory"
  );

  std::fs::rename(ctx.alice("proj"), ctx.alice("garden")).unwrap();

  let moved = eventually(TIMEOUT, move || async move {
    ctx.search_ids("zucchini").await == vec!["personal:alice:garden/x.md".to_string()]
      && ctx.cached("personal:alice:meta:garden/x.md").await.is_some()
      && ctx.cached("personal:alice:meta:proj/x.md").await.is_none()
      && ctx.cached("personal:alice:content:proj/x.md").await.is_none()
  })
  .await;
  assert!(
    moved,
    "old entries should be gone and new ones present: search={:?}",
    ctx.search_ids("zucchini").await
  );

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_directory_moved_into_tree_is_indexed() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  let outside = TempDir::new_in(ctx.root.path().parent().unwrap()).unwrap();
  let incoming = outside.path().join("imp");
  std::fs::create_dir_all(incoming.join("nested")).unwrap();
  std::fs::write(incoming.join("y.md"), "roast the rutabaga").unwrap();
  std::fs::write(incoming.join("nested/z.md"), "pickled kohlrabi").unwrap();

  std::fs::rename(&incoming, ctx.alice("imp")).unwrap();

  let indexed = eventually(TIMEOUT, move || async move {
    ctx.search_ids("rutabaga").await == vec!["personal:alice:imp/y.md".to_string()]
      && ctx.search_ids("kohlrabi").await == vec!["personal:alice:imp/nested/z.md".to_string()]
      && ctx.cached("personal:alice:content:imp/y.md").await.is_some()
  })
  .await;
  assert!(indexed, "files inside a moved-in directory should be indexed");

  context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removed_directory_clears_every_descendant() {
  let context = PipelineContext::start().await;
  let ctx = &context;

  std::fs::create_dir_all(ctx.alice("old/deeper")).unwrap();
  std::fs::write(ctx.alice("old/a.md"), "artichoke").unwrap();
  std::fs::write(ctx.alice("old/deeper/b.md"), "artichoke hearts").unwrap();
  assert!(
    eventually(TIMEOUT, move || async move { ctx.search_ids("artichoke").await.len() == 2 }).await,
    "both files should be indexed first"
  );

  // Moved out of the tree: no per-file events reach the watcher
  let graveyard = TempDir::new_in(ctx.root.path().parent().unwrap()).unwrap();
  std::fs::rename(ctx.alice("old"), graveyard.path().join("old")).unwrap();

  let cleared = eventually(TIMEOUT, move || async move {
    ctx.search_ids("artichoke").await.is_empty()
      && ctx.cached("personal:alice:meta:old/a.md").await.is_none()
      && ctx.cached("personal:alice:meta:old/deeper/b.md").await.is_none()
  })
  .await;
  assert!(cleared, "search and cache entries under the directory should be removed");

  context.shutdown().await;
}

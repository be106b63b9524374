//! Shared stores: the priority queue store and the cache store.
//!
//! Both synchronize internally and are handed to every component as `Arc`s.

pub mod cache;
pub mod queue;
pub mod remote;
pub mod stats;

pub use cache::{CacheBackend, CacheError, CacheStats, CacheStore, MemoryCache};
pub use queue::{MemoryQueue, QueueError, QueueStatsEntry, QueueStore};
pub use remote::{RemoteCache, RemoteQueue, fetch_status};

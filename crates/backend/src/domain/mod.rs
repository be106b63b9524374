//! Domain types - naming conventions, task records and configuration
//!
//! Everything the pipeline components agree on lives here. Stores, workers and
//! the watcher depend on these types; nothing here depends on them.

pub mod config;
pub mod keys;
pub mod task;

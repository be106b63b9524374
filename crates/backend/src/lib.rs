pub mod daemon;
pub mod dirs;
pub mod domain;
pub mod exec;
pub mod search;
pub mod server;
pub mod store;
pub mod watcher;
pub mod worker;

pub use daemon::{Daemon, DaemonError, RunningDaemon, RuntimeConfig};
pub use domain::config;

#[cfg(test)]
mod __tests__;

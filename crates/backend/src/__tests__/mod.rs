//! Crate-level integration tests: the full pipeline against a real watcher,
//! worker resilience, and the HTTP surface.

mod helpers;
mod http;
mod pipeline;
mod resilience;

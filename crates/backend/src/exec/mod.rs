//! Task execution: scripts, the engine that runs them, and the scheduler that
//! keeps them alive.

pub mod engine;
pub mod scheduler;
pub mod script;

pub use engine::{EngineError, OnStatus, RunStats, StatusReport, TaskEngine, TaskState};
pub use scheduler::{Cadence, Schedule, ScheduledTaskInfo, Scheduler, SchedulerError};
pub use script::{ScriptError, ScriptRegistry, TaskScript, script_fn};

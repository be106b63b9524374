//! docsync CLI - keeps cached and indexed views of a document tree in step with the filesystem

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{
  cmd_cache_get, cmd_config_init, cmd_config_show, cmd_daemon, cmd_queue_size, cmd_queue_stats, cmd_schedule_add,
  cmd_schedule_cancel, cmd_schedule_list, cmd_search, cmd_status,
};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "docsync")]
#[command(about = "Event-driven cache and search invalidation for document trees")]
#[command(after_help = "\
QUICK START:
  docsync config init             # Write ~/.config/docsync/config.toml
  docsync daemon --foreground     # Run the pipeline in this terminal
  docsync status                  # Probe every service

INSPECTION:
  docsync queue size cache-updates-high
  docsync cache get personal:alice:meta:notes/today.md
  docsync search \"meeting notes\" --scope personal")]
struct Cli {
  /// Config file (default: ~/.config/docsync/config.toml)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  /// Daemon base URL (default: derived from server.bind)
  #[arg(long, global = true, value_name = "URL")]
  url: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Write the commented config template
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
  /// Show the effective configuration as TOML
  Show,
}

#[derive(Subcommand)]
pub enum QueueCommand {
  /// Current depth of a queue
  Size { name: String },
  /// Recently active queues with message counts
  Stats,
}

#[derive(Subcommand)]
pub enum CacheCommand {
  /// Print a cache entry (`null` when absent)
  Get { key: String },
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
  /// Schedule a registered script
  Add {
    task: String,
    /// Run immediately, then every SECS seconds
    #[arg(long, value_name = "SECS", conflicts_with = "cron", required_unless_present = "cron")]
    every: Option<u64>,
    /// Cron-like expression (5 or 6 fields)
    #[arg(long, value_name = "EXPR")]
    cron: Option<String>,
    /// Script to run (default: the task name)
    #[arg(long)]
    script: Option<String>,
  },
  /// Unschedule a task
  Cancel { task: String },
  /// List scheduled tasks
  List,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the daemon (background unless --foreground)
  Daemon {
    #[arg(long)]
    foreground: bool,
    /// Internal: run in-process with file logging
    #[arg(long, hide = true)]
    background: bool,
  },
  /// Probe every service's status endpoint
  Status,
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Inspect queues
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Inspect the cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
  /// Query the search index
  Search {
    query: String,
    /// personal or git
    #[arg(long)]
    scope: Option<String>,
    /// Username or space name prefix
    #[arg(long)]
    identity: Option<String>,
    #[arg(short, long, default_value = "10")]
    limit: usize,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Manage scheduled tasks
  Schedule {
    #[command(subcommand)]
    command: ScheduleCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = cli.config.as_deref();
  let url = cli.url.as_deref();

  // The daemon sets up its own (config-driven) logging
  if !matches!(cli.command, Commands::Daemon { .. }) {
    init_cli_logging();
  }

  match cli.command {
    Commands::Daemon { foreground, background } => cmd_daemon(config, foreground, background).await,
    Commands::Status => cmd_status(config, url).await,

    Commands::Config { command } => match command {
      ConfigCommand::Init { force } => cmd_config_init(config, force),
      ConfigCommand::Show => cmd_config_show(config),
    },

    Commands::Queue { command } => match command {
      QueueCommand::Size { name } => cmd_queue_size(config, url, &name).await,
      QueueCommand::Stats => cmd_queue_stats(config, url).await,
    },

    Commands::Cache { command } => match command {
      CacheCommand::Get { key } => cmd_cache_get(config, url, &key).await,
    },

    Commands::Search {
      query,
      scope,
      identity,
      limit,
      json,
    } => cmd_search(config, url, &query, scope.as_deref(), identity.as_deref(), limit, json).await,

    Commands::Schedule { command } => match command {
      ScheduleCommand::Add {
        task,
        every,
        cron,
        script,
      } => cmd_schedule_add(config, url, &task, every, cron.as_deref(), script.as_deref()).await,
      ScheduleCommand::Cancel { task } => cmd_schedule_cancel(config, url, &task).await,
      ScheduleCommand::List => cmd_schedule_list(config, url).await,
    },
  }
}

//! docflow CLI - resumable document ingestion runs

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{
  cmd_config_init, cmd_config_show, cmd_event, cmd_health, cmd_resume, cmd_run, cmd_search, cmd_status, load_config,
};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Resumable document ingestion into a searchable index")]
#[command(after_help = "\
QUICK START:
  docflow config init                  # Write .docflow/config.toml
  docflow run --prefix contracts/2024/ # Ingest everything under a prefix
  docflow status                       # List runs
  docflow search \"termination fee\"     # Look up published chunks

RECOVERY:
  docflow resume                       # Restart interrupted runs
  docflow status <RUN_ID> --json       # Full run detail")]
struct Cli {
  /// Config file to use instead of the project/user lookup
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `docflow config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration as TOML
  Show,
  /// Write a commented default config to .docflow/config.toml
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Start a run over one or more blob prefixes and wait for it
  #[command(after_help = "\
EXAMPLES:
  docflow run                                 # Whole container
  docflow run --prefix a/ --prefix b/         # Two prefixes, in order
  docflow run --prefix a/ --concurrency 4     # At most 4 documents at once")]
  Run {
    /// Blob name prefix, repeatable. Omit to scan the whole container
    #[arg(long = "prefix", value_name = "PREFIX")]
    prefixes: Vec<String>,
    /// Target index (default: [run] index_name)
    #[arg(long)]
    index: Option<String>,
    /// Documents processed in parallel (default: [run] concurrency_limit)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Blobs per enumeration page (default: the concurrency limit)
    #[arg(long)]
    batch_size: Option<usize>,
  },
  /// Start a run from a blob notification
  Event {
    /// Storage API that produced the event; only PutBlob starts a run
    #[arg(long)]
    api: String,
    /// Event subject, e.g. /blobServices/default/containers/c/blobs/a.pdf
    #[arg(long)]
    subject: String,
  },
  /// Show one run, or list every run
  Status {
    /// Run id to show in detail
    run_id: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Restart every run that did not complete or fail
  Resume,
  /// Find published chunks containing every term of a query
  Search {
    /// Terms to look for, matched without regard to case
    query: String,
    /// Index to search (default: [run] index_name)
    #[arg(long)]
    index: Option<String>,
    #[arg(short, long, default_value = "10")]
    limit: usize,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Check checkpoint storage and report run counts
  Health,
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATIONS:
  Project: .docflow/config.toml
  User:    ~/.config/docflow/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = load_config(cli.config.as_deref())?;

  let _guard = init_logging(&config.log);

  match cli.command {
    Commands::Run {
      prefixes,
      index,
      concurrency,
      batch_size,
    } => cmd_run(config, prefixes, index, concurrency, batch_size).await,
    Commands::Event { api, subject } => cmd_event(config, api, subject).await,
    Commands::Status { run_id, json } => cmd_status(&config, run_id.as_deref(), json).await,
    Commands::Resume => cmd_resume(config).await,
    Commands::Search {
      query,
      index,
      limit,
      json,
    } => cmd_search(&config, &query, index.as_deref(), limit, json).await,
    Commands::Health => cmd_health(&config).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()),
      ConfigCommand::Init { force } => cmd_config_init(force),
    },
  }
}

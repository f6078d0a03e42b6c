//! Read-only commands: run status and health

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use docflow::RunRecord;
use docflow_core::{Config, RunId, RunStatus};

use super::{build_runtime, checkpoint_store};

/// Failures listed in the human-readable detail before truncating
const MAX_LISTED_FAILURES: usize = 10;

/// Show one run in detail, or list every known run.
pub async fn cmd_status(config: &Config, run_id: Option<&str>, json: bool) -> Result<()> {
  let store = checkpoint_store(config);

  if let Some(run_id) = run_id {
    let run_id = RunId::new(run_id);
    let Some(record) = store.load_run(&run_id).await.context("Failed to load run")? else {
      bail!("Run {} not found", run_id);
    };
    if json {
      println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
      print_record(&record);
    }
    return Ok(());
  }

  let records = store.list_runs().await.context("Failed to list runs")?;
  if json {
    println!("{}", serde_json::to_string_pretty(&records)?);
    return Ok(());
  }
  if records.is_empty() {
    println!("No runs recorded in {:?}", config.state.resolved_dir());
    return Ok(());
  }

  println!("{:<38} {:<10} {:>9} {:>8}  {}", "RUN", "STATUS", "PUBLISHED", "FAILED", "UPDATED");
  for record in &records {
    println!(
      "{:<38} {:<10} {:>9} {:>8}  {}",
      record.run_id.as_str(),
      record.status.to_string(),
      record.documents_published,
      record.failures.len(),
      local_time(record.updated_at)
    );
  }
  Ok(())
}

/// Report where state lives and how many runs are in each status.
pub async fn cmd_health(config: &Config) -> Result<()> {
  let runtime = build_runtime(config);
  let health = runtime.health().await.context("Checkpoint store is unreadable")?;
  let records = runtime.list().await.context("Failed to list runs")?;

  let count = |status: RunStatus| records.iter().filter(|r| r.status == status).count();
  let container = config.local.root.join(&config.run.container_name);

  println!("docflow Health");
  println!("==============\n");
  println!("Checkpoints:    {:?}", config.state.resolved_dir());
  println!("Index dir:      {:?}", config.local.index_dir);
  println!(
    "Container:      {:?} ({})",
    container,
    if container.is_dir() { "found" } else { "missing" }
  );
  println!("Embedding:      {} @ {}", config.embedding.model, config.embedding.ollama_url);
  println!("Classifier:     {} @ {}", config.classifier.model, config.classifier.ollama_url);
  println!();
  println!("Runs:           {} total, {} active", health.runs, health.active);
  println!("  Pending:      {}", count(RunStatus::Pending));
  println!("  Running:      {}", count(RunStatus::Running));
  println!("  Completed:    {}", count(RunStatus::Completed));
  println!("  Failed:       {}", count(RunStatus::Failed));

  Ok(())
}

pub(super) fn print_record(record: &RunRecord) {
  let request = &record.request;
  let prefixes = request
    .prefix_list
    .iter()
    .map(|p| if p.is_empty() { "(all)" } else { p.as_str() })
    .collect::<Vec<_>>()
    .join(", ");

  println!("Run:            {}", record.run_id);
  println!("Status:         {}", record.status);
  println!("Index:          {}", request.index_name);
  println!("Container:      {}", request.container_name);
  println!("Prefixes:       {}", prefixes);
  println!(
    "Concurrency:    {} (batch size {})",
    request.concurrency_limit, request.batch_size
  );
  match &record.cursor.continuation_token {
    Some(token) => println!(
      "Cursor:         prefix {}/{} at {}",
      record.cursor.prefix_offset,
      request.prefix_list.len(),
      token.as_str()
    ),
    None => println!(
      "Cursor:         prefix {}/{}",
      record.cursor.prefix_offset,
      request.prefix_list.len()
    ),
  }
  println!("Batches:        {}", record.batches_completed);
  println!("Published:      {}", record.documents_published);
  println!("Failed:         {}", record.failures.len());
  for failed in record.failures.iter().take(MAX_LISTED_FAILURES) {
    println!("                - {}: {}", failed.blob_name, failed.failure);
  }
  if record.failures.len() > MAX_LISTED_FAILURES {
    println!(
      "                ... and {} more",
      record.failures.len() - MAX_LISTED_FAILURES
    );
  }
  if let Some(error) = &record.error {
    println!("Error:          {}", error);
  }
  println!("Created:        {}", local_time(record.created_at));
  println!("Updated:        {}", local_time(record.updated_at));
}

fn local_time(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

//! Commands that start or restart runs

use anyhow::{Context, Result, bail};
use docflow::RunRecord;
use docflow_core::{BlobEvent, Config, ExplicitRequest, RunStatus, WorkRequest};
use tracing::info;

use super::{build_runtime, shutdown_on_ctrl_c, status::print_record};

/// Start a run over `prefixes` and wait until it stops.
pub async fn cmd_run(
  mut config: Config,
  prefixes: Vec<String>,
  index: Option<String>,
  concurrency: Option<usize>,
  batch_size: Option<usize>,
) -> Result<()> {
  if let Some(limit) = concurrency {
    config.run.concurrency_limit = limit;
  }
  if batch_size.is_some() {
    config.run.batch_size = batch_size;
  }

  let request = WorkRequest::from_explicit(
    ExplicitRequest {
      prefix_list: Some(prefixes),
      index_name: index,
    },
    &config.run,
  )
  .context("Invalid run request")?;

  submit_and_wait(&config, request).await
}

/// Start a run for a blob notification, or explain why none was started.
pub async fn cmd_event(config: Config, api: String, subject: String) -> Result<()> {
  let event = BlobEvent { api, subject };
  let Some(request) = WorkRequest::from_blob_event(&event, &config.run).context("Invalid blob event")? else {
    println!("Ignoring {} event for {}", event.api, event.subject);
    return Ok(());
  };

  submit_and_wait(&config, request).await
}

/// Restart every incomplete run and wait for all of them.
pub async fn cmd_resume(config: Config) -> Result<()> {
  let runtime = build_runtime(&config);
  shutdown_on_ctrl_c(&runtime);

  let resumed = runtime.resume_incomplete().await.context("Failed to resume runs")?;
  if resumed.is_empty() {
    println!("Nothing to resume");
    return Ok(());
  }
  info!(count = resumed.len(), "Resumed runs");

  let mut failed = 0;
  for run_id in &resumed {
    let record = runtime.wait(run_id).await.context("Failed to read run status")?;
    report(&record);
    if record.status == RunStatus::Failed {
      failed += 1;
    }
  }

  if failed > 0 {
    bail!("{} of {} resumed run(s) failed", failed, resumed.len());
  }
  Ok(())
}

async fn submit_and_wait(config: &Config, request: WorkRequest) -> Result<()> {
  let runtime = build_runtime(config);
  shutdown_on_ctrl_c(&runtime);

  let run_id = runtime.submit(request).await.context("Failed to submit run")?;
  println!("Started run {}", run_id);

  let record = runtime.wait(&run_id).await.context("Failed to read run status")?;
  report(&record);

  if record.status == RunStatus::Failed {
    bail!("Run {} failed", run_id);
  }
  Ok(())
}

fn report(record: &RunRecord) {
  println!();
  print_record(record);
  if record.status == RunStatus::Pending {
    println!();
    println!("Run was interrupted. Continue it with `docflow resume`.");
  }
}

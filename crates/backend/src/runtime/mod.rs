//! Orchestration runtime
//!
//! The front door for runs: accepts work requests, assigns run ids, spawns the
//! run loop and records status transitions. Run ids and timestamps are minted
//! here so the loop itself never reads the clock.

mod checkpoint;
mod registry;

use std::sync::Arc;

use chrono::Utc;
use docflow_core::{ConfigError, RunId, RunStatus, WorkRequest};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use self::{
  checkpoint::{CheckpointError, CheckpointStore, DocumentFailure, FileCheckpointStore, MemoryCheckpointStore, RunRecord},
  registry::RunRegistry,
};
use crate::{
  collab::Collaborators,
  engine::{CollectionOrchestrator, RetryPolicy, RunCompletion},
};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  #[error("invalid run request: {0}")]
  Configuration(#[from] ConfigError),
  #[error(transparent)]
  Checkpoint(#[from] CheckpointError),
  #[error("run {0} is already active")]
  AlreadyActive(RunId),
  #[error("run {0} not found")]
  NotFound(RunId),
}

/// Snapshot returned by [`Runtime::health`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
  pub runs: usize,
  pub active: usize,
}

struct RuntimeInner {
  orchestrator: CollectionOrchestrator,
  checkpoints: Arc<dyn CheckpointStore>,
  registry: RunRegistry,
}

/// Cheap to clone; every clone drives the same set of runs.
#[derive(Clone)]
pub struct Runtime {
  inner: Arc<RuntimeInner>,
}

impl Runtime {
  /// `cancel` is the parent token: cancelling it stops every run.
  pub fn new(
    collaborators: Collaborators,
    checkpoints: Arc<dyn CheckpointStore>,
    policy: RetryPolicy,
    cancel: CancellationToken,
  ) -> Self {
    let orchestrator = CollectionOrchestrator::new(collaborators, checkpoints.clone(), policy);
    Self {
      inner: Arc::new(RuntimeInner {
        orchestrator,
        checkpoints,
        registry: RunRegistry::new(cancel),
      }),
    }
  }

  /// Accept a request and start a new run for it.
  ///
  /// Configuration errors are returned here, before anything is persisted or
  /// enumerated.
  pub async fn submit(&self, request: WorkRequest) -> Result<RunId, RuntimeError> {
    request.validate()?;
    let run_id = RunId::new(uuid::Uuid::now_v7().to_string());
    let record = RunRecord::new(run_id.clone(), request, Utc::now());
    self.inner.checkpoints.save_run(&record).await?;
    info!(run_id = %run_id, "Run submitted");
    self.start(record)?;
    Ok(run_id)
  }

  /// Submit and wait for the run to stop.
  pub async fn run_to_completion(&self, request: WorkRequest) -> Result<RunRecord, RuntimeError> {
    let run_id = self.submit(request).await?;
    self.wait(&run_id).await
  }

  /// Spawn the loop for a persisted record.
  fn start(&self, record: RunRecord) -> Result<(), RuntimeError> {
    let Some(slot) = self.inner.registry.register(&record.run_id) else {
      return Err(RuntimeError::AlreadyActive(record.run_id));
    };
    let inner = self.inner.clone();
    tokio::spawn(async move {
      let run_id = record.run_id.clone();
      let status = inner.drive(record, &slot.cancel).await;
      inner.registry.finish(&run_id);
      let _ = slot.done.send(Some(status));
    });
    Ok(())
  }

  pub async fn status(&self, run_id: &RunId) -> Result<Option<RunRecord>, RuntimeError> {
    Ok(self.inner.checkpoints.load_run(run_id).await?)
  }

  /// Every known run, oldest first
  pub async fn list(&self) -> Result<Vec<RunRecord>, RuntimeError> {
    Ok(self.inner.checkpoints.list_runs().await?)
  }

  /// Ask a live run to stop after its in-flight documents finish.
  pub fn cancel(&self, run_id: &RunId) -> bool {
    self.inner.registry.cancel(run_id)
  }

  /// Cancel every live run.
  pub fn shutdown(&self) {
    self.inner.registry.cancel_all();
  }

  /// Wait until `run_id` has no live task, then return its persisted record.
  pub async fn wait(&self, run_id: &RunId) -> Result<RunRecord, RuntimeError> {
    if let Some(mut done) = self.inner.registry.waiter(run_id) {
      // A closed channel means the task is gone either way
      let _ = done.wait_for(|status| status.is_some()).await;
    }
    self
      .status(run_id)
      .await?
      .ok_or_else(|| RuntimeError::NotFound(run_id.clone()))
  }

  /// Restart every persisted run that is neither completed nor failed.
  ///
  /// Returns the ids that were started. Runs already live in this process
  /// are skipped.
  pub async fn resume_incomplete(&self) -> Result<Vec<RunId>, RuntimeError> {
    let mut resumed = Vec::new();
    for record in self.inner.checkpoints.list_runs().await? {
      if record.status.is_terminal() || self.inner.registry.is_active(&record.run_id) {
        continue;
      }
      let run_id = record.run_id.clone();
      info!(
        run_id = %run_id,
        status = %record.status,
        offset = record.cursor.prefix_offset,
        "Resuming run"
      );
      self.start(record)?;
      resumed.push(run_id);
    }
    Ok(resumed)
  }

  pub async fn health(&self) -> Result<Health, RuntimeError> {
    let runs = self.inner.checkpoints.list_runs().await?.len();
    Ok(Health {
      runs,
      active: self.inner.registry.active_count(),
    })
  }
}

impl RuntimeInner {
  /// Run the loop for `record` and persist the resulting status.
  async fn drive(&self, mut record: RunRecord, cancel: &CancellationToken) -> RunStatus {
    record.status = RunStatus::Running;
    record.error = None;
    record.updated_at = Utc::now();
    if let Err(e) = self.checkpoints.save_run(&record).await {
      warn!(run_id = %record.run_id, err = %e, "Could not persist running status");
    }

    match self.orchestrator.run(&mut record, cancel).await {
      Ok(RunCompletion::Completed) => {
        record.status = RunStatus::Completed;
      }
      Ok(RunCompletion::Cancelled) => {
        record.status = RunStatus::Pending;
      }
      Err(e) => {
        error!(run_id = %record.run_id, err = %e, "Run failed");
        record.status = RunStatus::Failed;
        record.error = Some(e.to_string());
      }
    }
    record.updated_at = Utc::now();

    if let Err(e) = self.checkpoints.save_run(&record).await {
      error!(run_id = %record.run_id, err = %e, "Could not persist final run status");
    }
    info!(
      run_id = %record.run_id,
      status = %record.status,
      published = record.documents_published,
      failed = record.failures.len(),
      "Run stopped"
    );
    record.status
  }
}

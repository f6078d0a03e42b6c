//! The resumable run loop
//!
//! One run is one [`RunRecord`]. The loop enumerates a batch, dispatches it,
//! waits for every document to finish, then persists the advanced cursor.
//! A crash between dispatch and the checkpoint replays the batch; completed
//! documents skip straight to their terminal state from their own checkpoints
//! and any re-publish is an upsert by key.

use std::sync::Arc;

use docflow_core::{ConfigError, CursorCorruption};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
  cursor::next_batch,
  dispatcher::{BatchReport, Dispatcher},
  pipeline::DocumentPipeline,
  retry::{RetryPolicy, StageKind},
  stage::{StageFailure, run_stage},
};
use crate::{
  collab::Collaborators,
  runtime::{CheckpointError, CheckpointStore, DocumentFailure, RunRecord},
};

/// How a run loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCompletion {
  /// Every prefix was enumerated and every batch dispatched
  Completed,
  /// Stopped between batches; the record holds the last finished cursor
  Cancelled,
}

/// Failures that end a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
  #[error("invalid run request: {0}")]
  Configuration(#[from] ConfigError),
  #[error("persisted cursor is corrupt: {0}")]
  CursorCorruption(#[from] CursorCorruption),
  #[error("could not ensure index {index:?}: {failure}")]
  EnsureIndex { index: String, failure: StageFailure },
  #[error("blob enumeration failed: {0}")]
  Enumeration(StageFailure),
  #[error(transparent)]
  Checkpoint(#[from] CheckpointError),
}

pub struct CollectionOrchestrator {
  collaborators: Collaborators,
  checkpoints: Arc<dyn CheckpointStore>,
  dispatcher: Dispatcher,
  policy: RetryPolicy,
}

impl CollectionOrchestrator {
  pub fn new(collaborators: Collaborators, checkpoints: Arc<dyn CheckpointStore>, policy: RetryPolicy) -> Self {
    let pipeline = Arc::new(DocumentPipeline::new(collaborators.clone(), checkpoints.clone(), policy));
    Self {
      collaborators,
      checkpoints,
      dispatcher: Dispatcher::new(pipeline),
      policy,
    }
  }

  /// Drive `record` until enumeration is exhausted, the token is cancelled or
  /// the run fails.
  ///
  /// `record` is updated in place and persisted after every finished batch.
  /// Passing back a previously persisted record resumes from its cursor.
  pub async fn run(&self, record: &mut RunRecord, cancel: &CancellationToken) -> Result<RunCompletion, RunError> {
    let request = record.request.clone();
    request.validate()?;
    record.cursor.validate(request.prefix_list.len())?;

    info!(
      run_id = %record.run_id,
      prefixes = request.prefix_list.len(),
      index = %request.index_name,
      offset = record.cursor.prefix_offset,
      "Starting run loop"
    );

    let publisher = self.collaborators.publisher.as_ref();
    let index = request.index_name.as_str();
    run_stage(&self.policy, StageKind::EnsureIndex, move || publisher.ensure_index(index))
      .await
      .map_err(|failure| RunError::EnsureIndex {
        index: request.index_name.clone(),
        failure,
      })?;

    let enumerator = self.collaborators.enumerator.as_ref();
    let container = request.container_name.as_str();
    let prefixes = request.prefix_list.as_slice();
    let batch_size = request.batch_size;

    loop {
      if cancel.is_cancelled() {
        info!(run_id = %record.run_id, "Run cancelled between batches");
        return Ok(RunCompletion::Cancelled);
      }

      let cursor = &record.cursor;
      let (batch, next_cursor) = run_stage(&self.policy, StageKind::Enumerate, move || {
        next_batch(enumerator, container, cursor, prefixes, batch_size)
      })
      .await
      .map_err(RunError::Enumeration)?;

      if batch.is_empty() && next_cursor == record.cursor {
        info!(
          run_id = %record.run_id,
          batches = record.batches_completed,
          published = record.documents_published,
          failed = record.failures.len(),
          "Enumeration exhausted, run complete"
        );
        return Ok(RunCompletion::Completed);
      }

      let report = if batch.is_empty() {
        debug!(run_id = %record.run_id, offset = record.cursor.prefix_offset, "Empty page, advancing cursor");
        BatchReport::default()
      } else {
        self
          .dispatcher
          .run_batch(&record.run_id, batch, index, request.concurrency_limit, cancel)
          .await
      };

      if report.cancelled {
        // Nothing from this batch is recorded; resume replays it
        warn!(
          run_id = %record.run_id,
          unscheduled = report.unscheduled.len(),
          "Run cancelled mid-batch"
        );
        return Ok(RunCompletion::Cancelled);
      }

      if !report.outcomes.is_empty() {
        record.batches_completed += 1;
      }
      record.cursor = next_cursor;
      record.documents_published += report.published() as u64;
      record.failures.extend(report.failures().map(|(blob, failure)| DocumentFailure {
        blob_name: blob.name.clone(),
        failure: failure.clone(),
      }));

      self.checkpoints.save_run(record).await?;
      self.checkpoints.clear_documents(&record.run_id).await?;
      debug!(
        run_id = %record.run_id,
        offset = record.cursor.prefix_offset,
        has_token = record.cursor.continuation_token.is_some(),
        "Cursor checkpointed"
      );
    }
  }
}

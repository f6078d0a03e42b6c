//! Bounded fan-out/fan-in over one batch of blobs

use std::{
  collections::{HashSet, VecDeque},
  panic::AssertUnwindSafe,
  sync::Arc,
};

use docflow_core::{BlobRef, RunId};
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
  pipeline::{DocumentJob, DocumentOutcome, DocumentPipeline},
  stage::StageFailure,
};

/// Everything that happened to one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
  /// One entry per scheduled blob, in batch order
  pub outcomes: Vec<DocumentOutcome>,
  /// Blobs never started because the run was cancelled
  pub unscheduled: Vec<BlobRef>,
  pub cancelled: bool,
}

impl BatchReport {
  pub fn published(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_published()).count()
  }

  pub fn failures(&self) -> impl Iterator<Item = (&BlobRef, &StageFailure)> {
    self
      .outcomes
      .iter()
      .filter_map(|o| o.failure.as_ref().map(|f| (&o.blob, f)))
  }
}

/// Runs document pipelines with at most `limit` in flight.
///
/// The dispatcher never retries anything itself; retries live in the stages.
pub struct Dispatcher {
  pipeline: Arc<DocumentPipeline>,
}

impl Dispatcher {
  pub fn new(pipeline: Arc<DocumentPipeline>) -> Self {
    Self { pipeline }
  }

  /// Run every blob in `blobs` to a terminal state and return once all of
  /// them got there.
  ///
  /// A blob name that appears twice in the batch is only scheduled once.
  /// After `cancel` fires no new pipeline starts, but the ones in flight finish.
  pub async fn run_batch(
    &self,
    run_id: &RunId,
    blobs: Vec<BlobRef>,
    index_name: &str,
    limit: usize,
    cancel: &CancellationToken,
  ) -> BatchReport {
    let limit = limit.max(1);
    let mut seen = HashSet::new();
    let mut queue: VecDeque<(usize, BlobRef)> = blobs
      .into_iter()
      .filter(|blob| seen.insert(blob.name.clone()))
      .enumerate()
      .collect();
    debug!(run_id = %run_id, blobs = queue.len(), limit, "Dispatching batch");

    let mut tasks: JoinSet<(usize, DocumentOutcome)> = JoinSet::new();
    let mut outcomes = Vec::with_capacity(queue.len());

    loop {
      while tasks.len() < limit && !cancel.is_cancelled() {
        let Some((position, blob)) = queue.pop_front() else {
          break;
        };
        let job = DocumentJob {
          run_id: run_id.clone(),
          blob,
          index_name: index_name.to_string(),
        };
        let pipeline = self.pipeline.clone();
        tasks.spawn(async move {
          let outcome = match AssertUnwindSafe(pipeline.run(&job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
              let stage = pipeline.resume_stage(&job).await;
              error!(blob = %job.blob.name, stage = %stage, "Document pipeline panicked");
              DocumentOutcome::failed(job.blob.clone(), StageFailure::fatal(stage, "pipeline task panicked"))
            }
          };
          (position, outcome)
        });
      }

      match tasks.join_next().await {
        Some(Ok(finished)) => outcomes.push(finished),
        Some(Err(e)) => error!(run_id = %run_id, err = %e, "Document task did not complete"),
        None => break,
      }
    }

    outcomes.sort_by_key(|(position, _)| *position);
    let outcomes: Vec<DocumentOutcome> = outcomes.into_iter().map(|(_, outcome)| outcome).collect();
    let unscheduled: Vec<BlobRef> = queue.into_iter().map(|(_, blob)| blob).collect();
    let cancelled = !unscheduled.is_empty();

    if cancelled {
      warn!(
        run_id = %run_id,
        finished = outcomes.len(),
        unscheduled = unscheduled.len(),
        "Batch interrupted by cancellation"
      );
    } else {
      let published = outcomes.iter().filter(|o| o.is_published()).count();
      info!(
        run_id = %run_id,
        published,
        failed = outcomes.len() - published,
        "Batch complete"
      );
    }

    BatchReport {
      outcomes,
      unscheduled,
      cancelled,
    }
  }
}

//! Registry of runs that currently have a live task
//!
//! Maps run ids to their cancellation token and a completion signal. A run id
//! can only be active once; starting it again while it is live is refused so
//! two loops never write the same cursor.

use dashmap::{DashMap, mapref::entry::Entry};
use docflow_core::{RunId, RunStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ActiveRun {
  cancel: CancellationToken,
  done: watch::Receiver<Option<RunStatus>>,
}

/// Handed to the task that drives a run
pub struct RunSlot {
  pub cancel: CancellationToken,
  pub done: watch::Sender<Option<RunStatus>>,
}

pub struct RunRegistry {
  active: DashMap<RunId, ActiveRun>,
  /// Parent of every run's token
  cancel: CancellationToken,
}

impl RunRegistry {
  pub fn new(cancel: CancellationToken) -> Self {
    Self {
      active: DashMap::new(),
      cancel,
    }
  }

  /// Claim `run_id`. Returns `None` if a task for it is already live.
  pub fn register(&self, run_id: &RunId) -> Option<RunSlot> {
    match self.active.entry(run_id.clone()) {
      Entry::Occupied(_) => None,
      Entry::Vacant(entry) => {
        let cancel = self.cancel.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        entry.insert(ActiveRun {
          cancel: cancel.clone(),
          done: done_rx,
        });
        debug!(run_id = %run_id, "Run registered");
        Some(RunSlot { cancel, done: done_tx })
      }
    }
  }

  /// Release `run_id` once its task has persisted its final state.
  pub fn finish(&self, run_id: &RunId) {
    self.active.remove(run_id);
  }

  /// Request cooperative cancellation. Returns false if the run is not live.
  pub fn cancel(&self, run_id: &RunId) -> bool {
    match self.active.get(run_id) {
      Some(run) => {
        run.cancel.cancel();
        true
      }
      None => false,
    }
  }

  pub fn cancel_all(&self) {
    self.cancel.cancel();
  }

  pub fn is_active(&self, run_id: &RunId) -> bool {
    self.active.contains_key(run_id)
  }

  pub fn active_count(&self) -> usize {
    self.active.len()
  }

  /// Completion signal for a live run
  pub fn waiter(&self, run_id: &RunId) -> Option<watch::Receiver<Option<RunStatus>>> {
    self.active.get(run_id).map(|run| run.done.clone())
  }
}

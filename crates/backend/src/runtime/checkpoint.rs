//! Durable run and document checkpoints
//!
//! Two granularities are persisted:
//!
//! - the run record (request, cursor, status detail), written after every
//!   finished batch
//! - per-document progress, written after every finished stage and cleared
//!   once the batch's cursor checkpoint is on disk
//!
//! The file store writes each record to a temp file and renames it into place
//! so a crash never leaves a half-written checkpoint behind.

use std::{
  io,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use docflow_core::{PaginationCursor, RunId, RunStatus, WorkRequest, blob_key};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::engine::{DocumentProgress, StageFailure};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
  #[error("checkpoint I/O error at {path}: {source}")]
  Io { path: PathBuf, source: io::Error },
  #[error("checkpoint serialization error: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("run id {0:?} cannot be used as a checkpoint key")]
  InvalidRunId(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CheckpointError + '_ {
  move |source| CheckpointError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A document that ended in `FatalFailure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
  pub blob_name: String,
  pub failure: StageFailure,
}

/// Persisted state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id: RunId,
  pub request: WorkRequest,
  pub cursor: PaginationCursor,
  pub status: RunStatus,
  pub batches_completed: u64,
  pub documents_published: u64,
  #[serde(default)]
  pub failures: Vec<DocumentFailure>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl RunRecord {
  /// A fresh record positioned at the start of enumeration.
  pub fn new(run_id: RunId, request: WorkRequest, now: DateTime<Utc>) -> Self {
    Self {
      run_id,
      request,
      cursor: PaginationCursor::start(),
      status: RunStatus::Pending,
      batches_completed: 0,
      documents_published: 0,
      failures: Vec::new(),
      error: None,
      created_at: now,
      updated_at: now,
    }
  }
}

/// Storage for run records and per-document progress
#[async_trait]
pub trait CheckpointStore: Send + Sync {
  async fn save_run(&self, record: &RunRecord) -> Result<(), CheckpointError>;
  async fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, CheckpointError>;
  /// All runs, oldest first
  async fn list_runs(&self) -> Result<Vec<RunRecord>, CheckpointError>;

  async fn save_document(
    &self,
    run_id: &RunId,
    blob_name: &str,
    progress: &DocumentProgress,
  ) -> Result<(), CheckpointError>;
  async fn load_document(&self, run_id: &RunId, blob_name: &str) -> Result<Option<DocumentProgress>, CheckpointError>;
  async fn clear_documents(&self, run_id: &RunId) -> Result<(), CheckpointError>;
}

fn sort_runs(runs: &mut [RunRecord]) {
  runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store; survives pipeline restarts but not process restarts.
#[derive(Default)]
pub struct MemoryCheckpointStore {
  runs: DashMap<RunId, RunRecord>,
  documents: DashMap<(RunId, String), DocumentProgress>,
}

impl MemoryCheckpointStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn document_count(&self, run_id: &RunId) -> usize {
    self.documents.iter().filter(|entry| &entry.key().0 == run_id).count()
  }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
  async fn save_run(&self, record: &RunRecord) -> Result<(), CheckpointError> {
    self.runs.insert(record.run_id.clone(), record.clone());
    Ok(())
  }

  async fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, CheckpointError> {
    Ok(self.runs.get(run_id).map(|r| r.value().clone()))
  }

  async fn list_runs(&self) -> Result<Vec<RunRecord>, CheckpointError> {
    let mut runs: Vec<RunRecord> = self.runs.iter().map(|r| r.value().clone()).collect();
    sort_runs(&mut runs);
    Ok(runs)
  }

  async fn save_document(
    &self,
    run_id: &RunId,
    blob_name: &str,
    progress: &DocumentProgress,
  ) -> Result<(), CheckpointError> {
    self
      .documents
      .insert((run_id.clone(), blob_name.to_string()), progress.clone());
    Ok(())
  }

  async fn load_document(&self, run_id: &RunId, blob_name: &str) -> Result<Option<DocumentProgress>, CheckpointError> {
    Ok(
      self
        .documents
        .get(&(run_id.clone(), blob_name.to_string()))
        .map(|p| p.value().clone()),
    )
  }

  async fn clear_documents(&self, run_id: &RunId) -> Result<(), CheckpointError> {
    self.documents.retain(|key, _| &key.0 != run_id);
    Ok(())
  }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Checkpoints as JSON files under a state directory:
///
/// ```text
/// <root>/runs/<run_id>.json
/// <root>/docs/<run_id>/<blob_key>.json
/// ```
pub struct FileCheckpointStore {
  root: PathBuf,
}

impl FileCheckpointStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn runs_dir(&self) -> PathBuf {
    self.root.join("runs")
  }

  fn run_path(&self, run_id: &RunId) -> Result<PathBuf, CheckpointError> {
    Ok(self.runs_dir().join(format!("{}.json", checked_id(run_id)?)))
  }

  fn docs_dir(&self, run_id: &RunId) -> Result<PathBuf, CheckpointError> {
    Ok(self.root.join("docs").join(checked_id(run_id)?))
  }

  fn document_path(&self, run_id: &RunId, blob_name: &str) -> Result<PathBuf, CheckpointError> {
    Ok(self.docs_dir(run_id)?.join(format!("{}.json", blob_key(blob_name))))
  }

  async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
    trace!(path = %path.display(), "Checkpoint written");
    Ok(())
  }

  async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, CheckpointError> {
    match tokio::fs::read(path).await {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(CheckpointError::Io {
        path: path.to_path_buf(),
        source,
      }),
    }
  }
}

/// Run ids become file names, so only a conservative character set is allowed.
fn checked_id(run_id: &RunId) -> Result<&str, CheckpointError> {
  let id = run_id.as_str();
  let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if valid {
    Ok(id)
  } else {
    Err(CheckpointError::InvalidRunId(id.to_string()))
  }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
  async fn save_run(&self, record: &RunRecord) -> Result<(), CheckpointError> {
    let path = self.run_path(&record.run_id)?;
    let bytes = serde_json::to_vec_pretty(record)?;
    self.write_atomic(&path, bytes).await
  }

  async fn load_run(&self, run_id: &RunId) -> Result<Option<RunRecord>, CheckpointError> {
    let path = self.run_path(run_id)?;
    self.read_json(&path).await
  }

  async fn list_runs(&self) -> Result<Vec<RunRecord>, CheckpointError> {
    let dir = self.runs_dir();
    let mut entries = match tokio::fs::read_dir(&dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(CheckpointError::Io { path: dir, source }),
    };

    let mut runs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      if let Some(record) = self.read_json::<RunRecord>(&path).await? {
        runs.push(record);
      }
    }
    sort_runs(&mut runs);
    debug!(count = runs.len(), dir = %dir.display(), "Listed run checkpoints");
    Ok(runs)
  }

  async fn save_document(
    &self,
    run_id: &RunId,
    blob_name: &str,
    progress: &DocumentProgress,
  ) -> Result<(), CheckpointError> {
    let path = self.document_path(run_id, blob_name)?;
    let bytes = serde_json::to_vec(progress)?;
    self.write_atomic(&path, bytes).await
  }

  async fn load_document(&self, run_id: &RunId, blob_name: &str) -> Result<Option<DocumentProgress>, CheckpointError> {
    let path = self.document_path(run_id, blob_name)?;
    self.read_json(&path).await
  }

  async fn clear_documents(&self, run_id: &RunId) -> Result<(), CheckpointError> {
    let dir = self.docs_dir(run_id)?;
    match tokio::fs::remove_dir_all(&dir).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CheckpointError::Io { path: dir, source }),
    }
  }
}

//! Per-document stage machine
//!
//! ```text
//! NotStarted → Cracked → Chunked → Embedded → EntitiesExtracted → Classified → Published
//! ```
//!
//! Any stage can end the document in `FatalFailure`. Progress is checkpointed
//! after every stage, so a pipeline restarted for the same blob skips every
//! stage it already finished.

use std::sync::Arc;

use docflow_core::{BlobRef, Chunk, Classification, CrackedDocument, RunId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
  retry::{RetryPolicy, StageKind},
  stage::{StageFailure, run_stage},
};
use crate::{
  collab::{CollaboratorError, Collaborators, IndexDocument},
  runtime::CheckpointStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
  #[default]
  NotStarted,
  Cracked,
  Chunked,
  Embedded,
  EntitiesExtracted,
  Classified,
  Published,
  FatalFailure,
}

impl DocumentState {
  /// The stage that moves a document out of this state, if any.
  pub fn next_stage(&self) -> Option<StageKind> {
    match self {
      DocumentState::NotStarted => Some(StageKind::Crack),
      DocumentState::Cracked => Some(StageKind::Chunk),
      DocumentState::Chunked => Some(StageKind::Embed),
      DocumentState::Embedded => Some(StageKind::ExtractEntities),
      DocumentState::EntitiesExtracted => Some(StageKind::Classify),
      DocumentState::Classified => Some(StageKind::Publish),
      DocumentState::Published | DocumentState::FatalFailure => None,
    }
  }

  /// State reached when `stage` succeeds.
  pub fn after(stage: StageKind) -> Self {
    match stage {
      StageKind::Crack => DocumentState::Cracked,
      StageKind::Chunk => DocumentState::Chunked,
      StageKind::Embed => DocumentState::Embedded,
      StageKind::ExtractEntities => DocumentState::EntitiesExtracted,
      StageKind::Classify => DocumentState::Classified,
      StageKind::Publish => DocumentState::Published,
      StageKind::Enumerate | StageKind::EnsureIndex => DocumentState::NotStarted,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.next_stage().is_none()
  }
}

/// Checkpointed progress of one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProgress {
  pub state: DocumentState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub document: Option<CrackedDocument>,
  #[serde(default)]
  pub chunks: Vec<Chunk>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure: Option<StageFailure>,
}

/// One blob to push through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentJob {
  pub run_id: RunId,
  pub blob: BlobRef,
  pub index_name: String,
}

/// Terminal result of a document job
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
  pub blob: BlobRef,
  pub state: DocumentState,
  pub chunks: usize,
  pub failure: Option<StageFailure>,
}

impl DocumentOutcome {
  pub fn is_published(&self) -> bool {
    self.state == DocumentState::Published
  }

  pub fn failed(blob: BlobRef, failure: StageFailure) -> Self {
    Self {
      blob,
      state: DocumentState::FatalFailure,
      chunks: 0,
      failure: Some(failure),
    }
  }
}

/// Runs one document at a time through every stage. Shared across workers.
pub struct DocumentPipeline {
  collaborators: Collaborators,
  checkpoints: Arc<dyn CheckpointStore>,
  policy: RetryPolicy,
}

impl DocumentPipeline {
  pub fn new(collaborators: Collaborators, checkpoints: Arc<dyn CheckpointStore>, policy: RetryPolicy) -> Self {
    Self {
      collaborators,
      checkpoints,
      policy,
    }
  }

  /// Drive `job` to a terminal state.
  ///
  /// Never returns an error: every failure ends up in the outcome.
  pub async fn run(&self, job: &DocumentJob) -> DocumentOutcome {
    let mut progress = match self.checkpoints.load_document(&job.run_id, &job.blob.name).await {
      Ok(Some(progress)) => {
        debug!(blob = %job.blob.name, state = ?progress.state, "Resuming document from checkpoint");
        progress
      }
      Ok(None) => DocumentProgress::default(),
      Err(e) => {
        // Starting over is safe: every stage is replayable and publish is an upsert
        warn!(blob = %job.blob.name, err = %e, "Could not load document checkpoint, starting over");
        DocumentProgress::default()
      }
    };

    while let Some(stage) = progress.state.next_stage() {
      match self.execute(stage, job, &mut progress).await {
        Ok(()) => {
          progress.state = DocumentState::after(stage);
          debug!(blob = %job.blob.name, stage = %stage, "Stage complete");
        }
        Err(failure) => {
          warn!(blob = %job.blob.name, stage = %stage, err = %failure, "Document failed");
          progress.state = DocumentState::FatalFailure;
          progress.failure = Some(failure);
        }
      }

      if let Err(e) = self
        .checkpoints
        .save_document(&job.run_id, &job.blob.name, &progress)
        .await
      {
        if progress.state.is_terminal() {
          warn!(blob = %job.blob.name, err = %e, "Could not checkpoint terminal document state");
        } else {
          let failure = StageFailure::fatal(stage, format!("checkpoint write failed: {}", e));
          warn!(blob = %job.blob.name, stage = %stage, err = %failure, "Document failed");
          progress.state = DocumentState::FatalFailure;
          progress.failure = Some(failure);
        }
      }
    }

    if progress.state == DocumentState::Published {
      info!(blob = %job.blob.name, chunks = progress.chunks.len(), "Document published");
    }

    DocumentOutcome {
      blob: job.blob.clone(),
      state: progress.state,
      chunks: progress.chunks.len(),
      failure: progress.failure,
    }
  }

  /// The stage a restarted pipeline for `job` would run first.
  pub async fn resume_stage(&self, job: &DocumentJob) -> StageKind {
    match self.checkpoints.load_document(&job.run_id, &job.blob.name).await {
      Ok(Some(progress)) => progress.state.next_stage().unwrap_or(StageKind::Publish),
      _ => StageKind::Crack,
    }
  }

  async fn execute(&self, stage: StageKind, job: &DocumentJob, progress: &mut DocumentProgress) -> Result<(), StageFailure> {
    let policy = &self.policy;
    let c = &self.collaborators;

    match stage {
      StageKind::Crack => {
        let cracker = c.cracker.as_ref();
        let url = job.blob.url.as_str();
        let document = run_stage(policy, stage, move || cracker.crack(url)).await?;
        progress.document = Some(document);
      }
      StageKind::Chunk => {
        let pages = progress.document.as_ref().map(|d| d.pages.as_slice()).unwrap_or_default();
        let chunker = c.chunker.as_ref();
        let chunks = run_stage(policy, stage, move || {
          let result = chunker.chunk(pages);
          async move { result }
        })
        .await?;
        if chunks.is_empty() {
          return Err(StageFailure::fatal(stage, "chunker produced no chunks"));
        }
        progress.chunks = chunks;
      }
      StageKind::Embed => {
        let texts = chunk_texts(&progress.chunks);
        let texts = texts.as_slice();
        let embedder = c.embedder.as_ref();
        let vectors = run_stage(policy, stage, move || embedder.embed(texts)).await?;
        check_aligned(stage, vectors.len(), progress.chunks.len())?;
        for (chunk, vector) in progress.chunks.iter_mut().zip(vectors) {
          chunk.fill_embedding(vector);
        }
      }
      StageKind::ExtractEntities => {
        let extractor = c.extractor.as_ref();
        let chunks = progress.chunks.as_slice();
        let entities = run_stage(policy, stage, move || {
          let found: Vec<_> = chunks.iter().map(|chunk| extractor.extract(&chunk.text)).collect();
          async move { Ok::<_, CollaboratorError>(found) }
        })
        .await?;
        check_aligned(stage, entities.len(), progress.chunks.len())?;
        for (chunk, found) in progress.chunks.iter_mut().zip(entities) {
          chunk.fill_entities(found);
        }
      }
      StageKind::Classify => {
        let texts = chunk_texts(&progress.chunks);
        let texts = texts.as_slice();
        let classifier = c.classifier.as_ref();
        let labels = run_stage(policy, stage, move || classifier.classify(texts)).await?;
        check_aligned(stage, labels.len(), progress.chunks.len())?;
        let labels = labels
          .iter()
          .map(|raw| raw.parse::<Classification>())
          .collect::<Result<Vec<_>, _>>()
          .map_err(|e| StageFailure::fatal(stage, e.to_string()))?;
        for (chunk, label) in progress.chunks.iter_mut().zip(labels) {
          chunk.fill_classification(label);
        }
      }
      StageKind::Publish => {
        let Some(document) = progress.document.as_ref() else {
          return Err(StageFailure::fatal(stage, "no cracked document to publish"));
        };
        let documents = IndexDocument::for_chunks(&job.blob, document, &progress.chunks);
        let documents = documents.as_slice();
        let index = job.index_name.as_str();
        let publisher = c.publisher.as_ref();
        run_stage(policy, stage, move || async move {
          let report = publisher.upsert(index, documents).await?;
          if report.failed > 0 {
            return Err(CollaboratorError::transient(format!(
              "{} of {} documents were rejected by the index",
              report.failed,
              documents.len()
            )));
          }
          Ok(report)
        })
        .await?;
      }
      StageKind::Enumerate | StageKind::EnsureIndex => {
        return Err(StageFailure::fatal(stage, "not a document stage"));
      }
    }

    Ok(())
  }
}

fn chunk_texts(chunks: &[Chunk]) -> Vec<String> {
  chunks.iter().map(|c| c.text.clone()).collect()
}

fn check_aligned(stage: StageKind, got: usize, expected: usize) -> Result<(), StageFailure> {
  if got != expected {
    return Err(StageFailure::fatal(
      stage,
      format!("returned {} results for {} chunks", got, expected),
    ));
  }
  Ok(())
}

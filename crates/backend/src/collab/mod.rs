//! External collaborator contracts
//!
//! The engine only knows each collaborator's input/output shape and whether a
//! failure is worth retrying. Every call that leaves the process goes through
//! one of these traits, which keeps the engine's own control flow free of I/O.
//!
//! The submodules are local adapters used by the CLI:
//!
//! - [`local`]: filesystem enumerator and plain-text cracker
//! - [`chunker`]: paragraph chunker
//! - [`entities`]: regex entity extractor
//! - [`ollama`]: embedder and classifier backed by an Ollama server
//! - [`index`]: JSON-file search index

pub mod chunker;
pub mod entities;
pub mod index;
pub mod local;
pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{BlobRef, Chunk, ContinuationToken, CrackedDocument, Entities, document_key};
use serde::{Deserialize, Serialize};

/// Failure reported by a collaborator.
///
/// The variant is the only thing the engine looks at when deciding whether to
/// retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
  /// Timeouts, throttling, 5xx, dropped connections
  #[error("transient: {0}")]
  Transient(String),
  /// Malformed input, bad response shape, anything a retry cannot fix
  #[error("fatal: {0}")]
  Fatal(String),
}

impl CollaboratorError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient(message.into())
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    Self::Fatal(message.into())
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transient(_))
  }

  /// Classify an HTTP error status: 408, 429 and 5xx are worth retrying.
  pub fn from_status(status: u16, body: &str) -> Self {
    let message = format!("service returned {}: {}", status, body);
    if status == 408 || status == 429 || (500..600).contains(&status) {
      Self::Transient(message)
    } else {
      Self::Fatal(message)
    }
  }
}

impl From<reqwest::Error> for CollaboratorError {
  fn from(err: reqwest::Error) -> Self {
    if let Some(status) = err.status() {
      return Self::from_status(status.as_u16(), &err.to_string());
    }
    if err.is_decode() || err.is_builder() {
      return Self::Fatal(err.to_string());
    }
    Self::Transient(err.to_string())
  }
}

/// One page of a blob listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobPage {
  pub blobs: Vec<BlobRef>,
  /// `None` when this was the last page for the prefix
  pub next_token: Option<ContinuationToken>,
}

/// Outcome of a batched index upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
  pub succeeded: usize,
  pub failed: usize,
}

/// A fully enriched chunk as written to the search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
  pub id: String,
  pub filename: String,
  pub storage_url: String,
  pub chunk_index: usize,
  #[serde(flatten)]
  pub chunk: Chunk,
}

impl IndexDocument {
  /// Build the index documents for every chunk of one blob.
  pub fn for_chunks(blob: &BlobRef, document: &CrackedDocument, chunks: &[Chunk]) -> Vec<Self> {
    chunks
      .iter()
      .enumerate()
      .map(|(chunk_index, chunk)| Self {
        id: document_key(&blob.name, chunk_index),
        filename: document.filename.clone(),
        storage_url: document.url.clone(),
        chunk_index,
        chunk: chunk.clone(),
      })
      .collect()
  }
}

// ============================================================================
// Contracts
// ============================================================================

/// Paginated blob listing, one prefix at a time
#[async_trait]
pub trait Enumerator: Send + Sync {
  async fn list_page(
    &self,
    container: &str,
    prefix: &str,
    token: Option<&ContinuationToken>,
    page_size: usize,
  ) -> Result<BlobPage, CollaboratorError>;
}

/// Layout extraction: blob URL to page texts
#[async_trait]
pub trait Cracker: Send + Sync {
  async fn crack(&self, blob_url: &str) -> Result<CrackedDocument, CollaboratorError>;
}

/// Split page texts into chunks. Empty input is a fatal error.
pub trait Chunker: Send + Sync {
  fn chunk(&self, pages: &[String]) -> Result<Vec<Chunk>, CollaboratorError>;
}

/// Batch vectorization; output is index-aligned with the input
#[async_trait]
pub trait Embedder: Send + Sync {
  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}

/// Pure entity scan of a single text
pub trait EntityExtractor: Send + Sync {
  fn extract(&self, text: &str) -> Entities;
}

/// Batch labelling; returns one raw label per input text
#[async_trait]
pub trait Classifier: Send + Sync {
  async fn classify(&self, texts: &[String]) -> Result<Vec<String>, CollaboratorError>;
}

/// Search index sink. Both operations must be idempotent.
#[async_trait]
pub trait IndexPublisher: Send + Sync {
  async fn ensure_index(&self, index_name: &str) -> Result<(), CollaboratorError>;
  async fn upsert(&self, index_name: &str, documents: &[IndexDocument]) -> Result<UpsertReport, CollaboratorError>;
}

/// Everything the engine calls out to, shared immutably across jobs
#[derive(Clone)]
pub struct Collaborators {
  pub enumerator: Arc<dyn Enumerator>,
  pub cracker: Arc<dyn Cracker>,
  pub chunker: Arc<dyn Chunker>,
  pub embedder: Arc<dyn Embedder>,
  pub extractor: Arc<dyn EntityExtractor>,
  pub classifier: Arc<dyn Classifier>,
  pub publisher: Arc<dyn IndexPublisher>,
}

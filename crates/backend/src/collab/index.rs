//! Search index kept as one JSON file per index
//!
//! Documents are stored in a map keyed by document id, so upserting the same
//! chunk twice leaves a single entry. [`JsonFileIndex::search`] is a plain
//! term lookup over chunk text.

use std::{
  collections::BTreeMap,
  io,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use docflow_core::Classification;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CollaboratorError, IndexDocument, IndexPublisher, UpsertReport};

type IndexContents = BTreeMap<String, IndexDocument>;

/// One chunk matching a search, without its embedding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
  pub id: String,
  pub filename: String,
  pub storage_url: String,
  pub chunk_index: usize,
  pub classification: Option<Classification>,
  pub content: String,
  /// Total occurrences of the query terms in the chunk
  pub score: usize,
}

impl SearchHit {
  fn new(doc: IndexDocument, score: usize) -> Self {
    Self {
      id: doc.id,
      filename: doc.filename,
      storage_url: doc.storage_url,
      chunk_index: doc.chunk_index,
      classification: doc.chunk.classification,
      content: doc.chunk.text,
      score,
    }
  }
}

/// Occurrences of every term in `text`, or `None` if any term is missing.
fn term_score(text: &str, terms: &[String]) -> Option<usize> {
  let text = text.to_lowercase();
  terms.iter().try_fold(0, |total, term| match text.matches(term.as_str()).count() {
    0 => None,
    n => Some(total + n),
  })
}

pub struct JsonFileIndex {
  dir: PathBuf,
  /// Serializes read-modify-write cycles across concurrent publishers
  lock: Mutex<()>,
}

impl JsonFileIndex {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      lock: Mutex::new(()),
    }
  }

  fn index_path(&self, index_name: &str) -> Result<PathBuf, CollaboratorError> {
    let valid = !index_name.is_empty()
      && index_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
      return Err(CollaboratorError::fatal(format!("invalid index name {:?}", index_name)));
    }
    Ok(self.dir.join(format!("{}.json", index_name)))
  }

  async fn read(path: &Path) -> Result<Option<IndexContents>, CollaboratorError> {
    match tokio::fs::read(path).await {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CollaboratorError::fatal(format!("corrupt index {}: {}", path.display(), e))),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(CollaboratorError::transient(format!("reading {}: {}", path.display(), e))),
    }
  }

  async fn write(path: &Path, contents: &IndexContents) -> Result<(), CollaboratorError> {
    let bytes = serde_json::to_vec_pretty(contents).map_err(|e| CollaboratorError::fatal(e.to_string()))?;
    let io_err = |e: io::Error| CollaboratorError::transient(format!("writing {}: {}", path.display(), e));
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
  }

  async fn contents(&self, index_name: &str) -> Result<IndexContents, CollaboratorError> {
    let path = self.index_path(index_name)?;
    let _guard = self.lock.lock().await;
    Self::read(&path)
      .await?
      .ok_or_else(|| CollaboratorError::fatal(format!("index {} does not exist", index_name)))
  }

  /// Chunks containing every whitespace-separated term of `query`, ignoring
  /// case. Best matches first, ties broken by id; at most `limit` hits.
  pub async fn search(&self, index_name: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
      return Err(CollaboratorError::fatal("search query is empty"));
    }

    let contents = self.contents(index_name).await?;
    let scanned = contents.len();
    let mut hits: Vec<SearchHit> = contents
      .into_values()
      .filter_map(|doc| term_score(&doc.chunk.text, &terms).map(|score| SearchHit::new(doc, score)))
      .collect();
    // BTreeMap order is id order, and the sort is stable
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(limit);

    debug!(index = index_name, scanned, hits = hits.len(), "Searched index");
    Ok(hits)
  }
}

#[async_trait]
impl IndexPublisher for JsonFileIndex {
  async fn ensure_index(&self, index_name: &str) -> Result<(), CollaboratorError> {
    let path = self.index_path(index_name)?;
    let _guard = self.lock.lock().await;
    if Self::read(&path).await?.is_none() {
      Self::write(&path, &IndexContents::new()).await?;
      info!(index = index_name, path = %path.display(), "Created index");
    }
    Ok(())
  }

  async fn upsert(&self, index_name: &str, documents: &[IndexDocument]) -> Result<UpsertReport, CollaboratorError> {
    let path = self.index_path(index_name)?;
    let _guard = self.lock.lock().await;
    let mut contents = Self::read(&path)
      .await?
      .ok_or_else(|| CollaboratorError::fatal(format!("index {} does not exist", index_name)))?;

    for doc in documents {
      contents.insert(doc.id.clone(), doc.clone());
    }
    Self::write(&path, &contents).await?;
    debug!(index = index_name, upserted = documents.len(), total = contents.len(), "Upserted documents");

    Ok(UpsertReport {
      succeeded: documents.len(),
      failed: 0,
    })
  }
}

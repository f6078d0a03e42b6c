//! Filesystem stand-ins for the object store and layout extraction
//!
//! A container is a directory under the configured root and a blob is any
//! file below it, named by its `/`-separated path relative to the container.
//! Listings are sorted by name and the continuation token is the last name of
//! the previous page, so pagination is stable while files are only added.

use std::{
  io,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use docflow_core::{BlobRef, ContinuationToken, CrackedDocument};
use tracing::{debug, trace};
use url::Url;
use walkdir::WalkDir;

use super::{BlobPage, CollaboratorError, Cracker, Enumerator};

/// Page separator in plain-text documents
const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Clone)]
pub struct LocalDirEnumerator {
  root: PathBuf,
}

impl LocalDirEnumerator {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

/// Every file under `dir` as (relative name, absolute path), sorted by name.
fn walk_container(dir: &Path) -> Result<Vec<(String, PathBuf)>, CollaboratorError> {
  let mut files = Vec::new();
  for entry in WalkDir::new(dir).follow_links(false) {
    let entry = entry.map_err(|e| CollaboratorError::transient(format!("walking {}: {}", dir.display(), e)))?;
    if !entry.file_type().is_file() {
      continue;
    }
    let Ok(relative) = entry.path().strip_prefix(dir) else {
      continue;
    };
    let name = relative
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    files.push((name, entry.path().to_path_buf()));
  }
  files.sort_by(|a, b| a.0.cmp(&b.0));
  Ok(files)
}

fn page_of(
  files: Vec<(String, PathBuf)>,
  prefix: &str,
  after: Option<&str>,
  page_size: usize,
) -> Result<BlobPage, CollaboratorError> {
  let mut matching = files
    .into_iter()
    .filter(|(name, _)| name.starts_with(prefix))
    .filter(|(name, _)| after.is_none_or(|after| name.as_str() > after))
    .peekable();

  let mut blobs = Vec::new();
  while blobs.len() < page_size.max(1) {
    let Some((name, path)) = matching.next() else {
      break;
    };
    let url = Url::from_file_path(&path)
      .map_err(|_| CollaboratorError::fatal(format!("{} is not an absolute path", path.display())))?;
    blobs.push(BlobRef::new(url.to_string(), name));
  }

  let next_token = match (matching.peek(), blobs.last()) {
    (Some(_), Some(last)) => Some(ContinuationToken::new(last.name.clone())),
    _ => None,
  };
  Ok(BlobPage { blobs, next_token })
}

#[async_trait]
impl Enumerator for LocalDirEnumerator {
  async fn list_page(
    &self,
    container: &str,
    prefix: &str,
    token: Option<&ContinuationToken>,
    page_size: usize,
  ) -> Result<BlobPage, CollaboratorError> {
    let dir = std::path::absolute(self.root.join(container))
      .map_err(|e| CollaboratorError::fatal(format!("resolving container {}: {}", container, e)))?;
    if !dir.is_dir() {
      return Err(CollaboratorError::fatal(format!("container {} not found", dir.display())));
    }

    let walk_dir = dir.clone();
    let files = tokio::task::spawn_blocking(move || walk_container(&walk_dir))
      .await
      .map_err(|e| CollaboratorError::transient(format!("listing task failed: {}", e)))??;

    let page = page_of(files, prefix, token.map(|t| t.as_str()), page_size)?;
    debug!(
      container,
      prefix,
      blobs = page.blobs.len(),
      more = page.next_token.is_some(),
      "Listed local blobs"
    );
    Ok(page)
  }
}

// ============================================================================
// Cracker
// ============================================================================

/// Reads UTF-8 text files; form feeds separate pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFileCracker;

#[async_trait]
impl Cracker for TextFileCracker {
  async fn crack(&self, blob_url: &str) -> Result<CrackedDocument, CollaboratorError> {
    let url = Url::parse(blob_url).map_err(|e| CollaboratorError::fatal(format!("bad blob url {}: {}", blob_url, e)))?;
    let path = url
      .to_file_path()
      .map_err(|_| CollaboratorError::fatal(format!("not a local file url: {}", blob_url)))?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
      io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
        CollaboratorError::fatal(format!("reading {}: {}", path.display(), e))
      }
      _ => CollaboratorError::transient(format!("reading {}: {}", path.display(), e)),
    })?;
    let text = String::from_utf8(bytes)
      .map_err(|_| CollaboratorError::fatal(format!("{} is not valid UTF-8", path.display())))?;

    let filename = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
    trace!(file = %filename, pages = pages.len(), "Cracked text file");

    Ok(CrackedDocument {
      pages,
      url: blob_url.to_string(),
      filename,
    })
  }
}

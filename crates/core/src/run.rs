//! Run-level types: the normalized work request, the pagination cursor and
//! run status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, RunConfig};

/// Opaque identifier of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Externally visible lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
  /// Accepted (or parked after cancellation) and waiting to be started
  Pending,
  Running,
  Completed,
  Failed,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, RunStatus::Completed | RunStatus::Failed)
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      RunStatus::Pending => "Pending",
      RunStatus::Running => "Running",
      RunStatus::Completed => "Completed",
      RunStatus::Failed => "Failed",
    };
    f.write_str(s)
  }
}

// ============================================================================
// Pagination Cursor
// ============================================================================

/// Opaque continuation token handed out by a paginated listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Position across an ordered list of independently paginated prefixes.
///
/// `prefix_offset` never decreases. `continuation_token` is `None` when the
/// current prefix has not been listed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCursor {
  pub prefix_offset: usize,
  pub continuation_token: Option<ContinuationToken>,
}

/// A persisted cursor that does not fit the prefix list it is resumed against
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cursor offset {offset} is beyond the {prefix_count} configured prefixes")]
pub struct CursorCorruption {
  pub offset: usize,
  pub prefix_count: usize,
}

impl PaginationCursor {
  pub fn start() -> Self {
    Self::default()
  }

  /// True once every prefix has been fully listed.
  pub fn is_exhausted(&self, prefix_count: usize) -> bool {
    self.prefix_offset >= prefix_count
  }

  /// Reject a cursor that points past the end of the prefix list.
  ///
  /// An offset equal to the prefix count is a finished enumeration and is fine.
  pub fn validate(&self, prefix_count: usize) -> Result<(), CursorCorruption> {
    if self.prefix_offset > prefix_count {
      return Err(CursorCorruption {
        offset: self.prefix_offset,
        prefix_count,
      });
    }
    Ok(())
  }

  /// Cursor after a page of the current prefix came back with `next_token`.
  ///
  /// No token (or an empty one) means the page was the prefix's last, so the
  /// next call moves on to the following prefix.
  pub fn advance(&self, next_token: Option<ContinuationToken>) -> Self {
    match next_token.filter(|t| !t.as_str().is_empty()) {
      Some(token) => Self {
        prefix_offset: self.prefix_offset,
        continuation_token: Some(token),
      },
      None => Self {
        prefix_offset: self.prefix_offset + 1,
        continuation_token: None,
      },
    }
  }
}

// ============================================================================
// Work Request
// ============================================================================

/// Normalized, validated input for one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
  pub prefix_list: Vec<String>,
  pub index_name: String,
  pub container_name: String,
  pub concurrency_limit: usize,
  pub batch_size: usize,
}

/// Explicit run request, as posted by an operator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplicitRequest {
  #[serde(default)]
  pub prefix_list: Option<Vec<String>>,
  #[serde(default)]
  pub index_name: Option<String>,
}

/// Blob notification from the object store
#[derive(Debug, Clone, Deserialize)]
pub struct BlobEvent {
  /// Storage API that produced the event, e.g. `PutBlob`
  pub api: String,
  /// `/blobServices/default/containers/<container>/blobs/<path>`
  pub subject: String,
}

/// Only freshly written blobs start a run.
const BLOB_CREATED_API: &str = "PutBlob";

impl WorkRequest {
  /// Build a request from an explicit prefix list.
  ///
  /// A missing or empty prefix list means "scan the whole container".
  pub fn from_explicit(request: ExplicitRequest, defaults: &RunConfig) -> Result<Self, ConfigError> {
    let prefix_list = match request.prefix_list {
      Some(list) if !list.is_empty() => list,
      _ => vec![String::new()],
    };
    let index_name = request.index_name.unwrap_or_else(|| defaults.index_name.clone());
    Self::build(prefix_list, index_name, defaults)
  }

  /// Build a request from a blob notification.
  ///
  /// Returns `Ok(None)` for events that should not start a run.
  pub fn from_blob_event(event: &BlobEvent, defaults: &RunConfig) -> Result<Option<Self>, ConfigError> {
    if event.api != BLOB_CREATED_API {
      return Ok(None);
    }
    let path = event
      .subject
      .split_once("/blobs/")
      .map(|(_, path)| path)
      .unwrap_or(event.subject.as_str());
    if path.is_empty() {
      return Err(ConfigError::InvalidParameter {
        name: "subject",
        reason: format!("no blob path in {:?}", event.subject),
      });
    }
    Self::build(vec![path.to_string()], defaults.index_name.clone(), defaults).map(Some)
  }

  fn build(prefix_list: Vec<String>, index_name: String, defaults: &RunConfig) -> Result<Self, ConfigError> {
    let request = Self {
      prefix_list,
      index_name,
      container_name: defaults.container_name.clone(),
      concurrency_limit: defaults.concurrency_limit,
      batch_size: defaults.batch_size.unwrap_or(defaults.concurrency_limit),
    };
    request.validate()?;
    Ok(request)
  }

  /// Check every required parameter. Runs before any enumeration happens.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.container_name.trim().is_empty() {
      return Err(ConfigError::MissingParameter("container_name"));
    }
    if self.index_name.trim().is_empty() {
      return Err(ConfigError::MissingParameter("index_name"));
    }
    if self.concurrency_limit == 0 {
      return Err(ConfigError::InvalidParameter {
        name: "concurrency_limit",
        reason: "must be greater than zero".to_string(),
      });
    }
    if self.batch_size == 0 {
      return Err(ConfigError::InvalidParameter {
        name: "batch_size",
        reason: "must be greater than zero".to_string(),
      });
    }
    if self.prefix_list.is_empty() {
      return Err(ConfigError::MissingParameter("prefix_list"));
    }
    Ok(())
  }
}

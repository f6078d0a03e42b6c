//! Document and chunk types that flow through the per-document pipeline.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A blob discovered by enumeration.
///
/// `url` carries a time-limited read credential, so it is only valid for the
/// run that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
  pub url: String,
  pub name: String,
}

impl BlobRef {
  pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      name: name.into(),
    }
  }
}

/// Output of layout extraction: one string per page, tables already merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrackedDocument {
  pub pages: Vec<String>,
  pub url: String,
  pub filename: String,
}

/// Entities pulled out of a chunk's text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
  pub zipcodes: Vec<String>,
  pub domains: Vec<String>,
  pub urls: Vec<String>,
  pub phone_numbers: Vec<String>,
  pub emails: Vec<String>,
}

/// Fixed label set for chunk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
  PreambleBlock,
  TermsandconditionsBlock,
  SignatureBlock,
  ServiceBlock,
  PricingBlock,
  Other,
}

impl Classification {
  pub const ALL: [Classification; 6] = [
    Classification::PreambleBlock,
    Classification::TermsandconditionsBlock,
    Classification::SignatureBlock,
    Classification::ServiceBlock,
    Classification::PricingBlock,
    Classification::Other,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Classification::PreambleBlock => "PreambleBlock",
      Classification::TermsandconditionsBlock => "TermsandconditionsBlock",
      Classification::SignatureBlock => "SignatureBlock",
      Classification::ServiceBlock => "ServiceBlock",
      Classification::PricingBlock => "PricingBlock",
      Classification::Other => "Other",
    }
  }
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A label outside the fixed vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("label {0:?} is not in the classification vocabulary")]
pub struct UnknownClassification(pub String);

impl FromStr for Classification {
  type Err = UnknownClassification;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    Classification::ALL
      .into_iter()
      .find(|c| c.as_str() == trimmed)
      .ok_or_else(|| UnknownClassification(trimmed.to_string()))
  }
}

/// One chunk of a document.
///
/// Fields are filled in stage by stage. The `fill_*` setters only ever write
/// a value; nothing in the pipeline clears a field once it is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
  pub text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entities: Option<Entities>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub classification: Option<Classification>,
}

impl Chunk {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      ..Default::default()
    }
  }

  pub fn fill_embedding(&mut self, embedding: Vec<f32>) {
    self.embedding = Some(embedding);
  }

  pub fn fill_entities(&mut self, entities: Entities) {
    self.entities = Some(entities);
  }

  pub fn fill_classification(&mut self, classification: Classification) {
    self.classification = Some(classification);
  }
}

/// Deterministic index key for chunk `chunk_index` of blob `blob_name`.
///
/// Re-publishing the same chunk always produces the same key, which is what
/// makes replayed publishes idempotent upserts.
pub fn document_key(blob_name: &str, chunk_index: usize) -> String {
  format!("{}-{}", blob_key(blob_name), chunk_index)
}

/// Stable, filesystem- and index-safe key for a blob name.
///
/// SHA-256 truncated to 32 hex chars.
pub fn blob_key(blob_name: &str) -> String {
  let digest = Sha256::digest(blob_name.as_bytes());
  let mut hex = hex::encode(digest);
  hex.truncate(32);
  hex
}

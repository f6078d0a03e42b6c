//! Core domain types for docflow.
//!
//! Everything in here is plain data plus pure functions: no I/O beyond
//! reading configuration files, no async. The engine in the `docflow` crate
//! builds on these types.

pub mod config;
pub mod document;
pub mod run;

pub use config::{
  ClassifierConfig, Config, ConfigError, EmbeddingConfig, LocalConfig, LogConfig, RetryConfig, RunConfig,
  StageRetryConfig, StateConfig,
};
pub use document::{BlobRef, Chunk, Classification, CrackedDocument, Entities, UnknownClassification, blob_key, document_key};
pub use run::{
  BlobEvent, ContinuationToken, CursorCorruption, ExplicitRequest, PaginationCursor, RunId, RunStatus, WorkRequest,
};

//! Resumable fan-out/fan-in document ingestion.
//!
//! - [`engine`]: retry policy, batch enumeration, the per-document pipeline,
//!   the bounded dispatcher and the run loop
//! - [`runtime`]: checkpoints, live-run registry and the `Runtime` front door
//! - [`collab`]: collaborator contracts plus the local adapters the CLI uses

pub mod collab;
pub mod engine;
pub mod runtime;

pub use collab::{CollaboratorError, Collaborators};
pub use engine::{RetryPolicy, RunCompletion, RunError};
pub use runtime::{CheckpointStore, FileCheckpointStore, Health, MemoryCheckpointStore, RunRecord, Runtime, RuntimeError};

//! The workflow engine
//!
//! ```text
//! CollectionOrchestrator ── next_batch ──▶ Enumerator
//!        │
//!        ▼
//!   Dispatcher (≤ N in flight)
//!        │
//!        ▼
//!   DocumentPipeline: crack → chunk → embed → extract → classify → publish
//! ```
//!
//! Control flow decisions are pure (`PaginationCursor::advance`,
//! `DocumentState::next_stage`, `RetryPolicy::decide`); every effect goes
//! through a collaborator or the checkpoint store.

mod cursor;
mod dispatcher;
mod orchestrator;
mod pipeline;
mod retry;
mod stage;

#[cfg(test)]
mod __tests__;

pub use cursor::next_batch;
pub use dispatcher::{BatchReport, Dispatcher};
pub use orchestrator::{CollectionOrchestrator, RunCompletion, RunError};
pub use pipeline::{DocumentJob, DocumentOutcome, DocumentPipeline, DocumentProgress, DocumentState};
pub use retry::{RetryDecision, RetryPolicy, StageKind, StagePolicy};
pub use stage::{StageFailure, StageResult, run_stage};

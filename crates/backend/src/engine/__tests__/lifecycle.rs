//! Runtime lifecycle tests.
//!
//! Submit, wait, cancel and resume runs through the `Runtime` front door.

#[cfg(test)]
mod tests {
  use std::sync::atomic::Ordering;

  use docflow_core::{RunStatus, WorkRequest};
  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::{
    engine::__tests__::helpers::{EngineTestContext, fast_policy},
    runtime::{Runtime, RuntimeError},
  };

  fn runtime(ctx: &EngineTestContext) -> Runtime {
    Runtime::new(
      ctx.collaborators(),
      ctx.store(),
      fast_policy(),
      CancellationToken::new(),
    )
  }

  fn request() -> WorkRequest {
    EngineTestContext::request(&[""], 2, 2)
  }

  /// Test: a submitted run completes and its detail is visible by id.
  #[tokio::test(start_paused = true)]
  async fn test_submit_and_wait() {
    let ctx = EngineTestContext::builder(&["a.pdf", "b.pdf", "c.pdf"]).fatal("b.pdf").build();
    let runtime = runtime(&ctx);

    let record = runtime.run_to_completion(request()).await.unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.documents_published, 2);
    assert_eq!(record.failures.len(), 1);
    assert!(record.updated_at >= record.created_at);

    let status = runtime.status(&record.run_id).await.unwrap().expect("run is persisted");
    assert_eq!(status.status, RunStatus::Completed);
    assert_eq!(runtime.list().await.unwrap().len(), 1);

    let health = runtime.health().await.unwrap();
    assert_eq!(health.runs, 1);
    assert_eq!(health.active, 0);
  }

  /// Test: an invalid request is rejected synchronously and never persisted.
  #[tokio::test]
  async fn test_invalid_request_is_rejected_at_submit() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    let runtime = runtime(&ctx);
    let mut bad = request();
    bad.index_name = String::new();

    let err = runtime.submit(bad).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Configuration(_)));
    assert!(runtime.list().await.unwrap().is_empty());
    assert_eq!(ctx.enumerator.calls(), 0);
  }

  /// Test: a run whose index cannot be created ends Failed with a cause.
  #[tokio::test(start_paused = true)]
  async fn test_failed_run_records_error() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    ctx.index.ensure_failures.store(10, Ordering::SeqCst);
    let runtime = runtime(&ctx);

    let record = runtime.run_to_completion(request()).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let error = record.error.expect("failed runs carry an error");
    assert!(error.contains("test-index"), "unexpected error: {}", error);
  }

  /// Test: a cancelled run is parked as Pending and resume finishes it.
  #[tokio::test(start_paused = true)]
  async fn test_cancel_then_resume() {
    let ctx = EngineTestContext::new(&["a.pdf", "b.pdf", "c.pdf"]);
    let runtime = runtime(&ctx);

    let run_id = runtime.submit(request()).await.unwrap();
    assert!(runtime.cancel(&run_id));
    let parked = runtime.wait(&run_id).await.unwrap();
    assert_eq!(parked.status, RunStatus::Pending);
    assert!(!runtime.cancel(&run_id), "no live task after parking");

    let resumed = runtime.resume_incomplete().await.unwrap();
    assert_eq!(resumed, vec![run_id.clone()]);

    let finished = runtime.wait(&run_id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(ctx.index.published_blobs().len(), 3);
  }

  /// Test: resume only restarts runs that are neither completed nor failed.
  #[tokio::test(start_paused = true)]
  async fn test_resume_skips_terminal_runs() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    let runtime = runtime(&ctx);
    runtime.run_to_completion(request()).await.unwrap();

    assert!(runtime.resume_incomplete().await.unwrap().is_empty());
  }

  /// Test: shutting the runtime down parks every live run.
  #[tokio::test(start_paused = true)]
  async fn test_shutdown_parks_live_runs() {
    let ctx = EngineTestContext::new(&["a.pdf", "b.pdf"]);
    let runtime = runtime(&ctx);

    let first = runtime.submit(request()).await.unwrap();
    let second = runtime.submit(request()).await.unwrap();
    runtime.shutdown();

    assert_eq!(runtime.wait(&first).await.unwrap().status, RunStatus::Pending);
    assert_eq!(runtime.wait(&second).await.unwrap().status, RunStatus::Pending);
  }
}

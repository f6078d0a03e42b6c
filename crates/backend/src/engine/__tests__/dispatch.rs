//! Dispatcher tests.

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use docflow_core::RunId;
  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::engine::{
    Dispatcher, DocumentPipeline, DocumentState, StageKind,
    __tests__::helpers::{EngineTestContext, blob, fast_policy},
  };

  fn dispatcher(ctx: &EngineTestContext) -> Dispatcher {
    let pipeline = DocumentPipeline::new(ctx.collaborators(), ctx.store(), fast_policy());
    Dispatcher::new(Arc::new(pipeline))
  }

  /// Test: outcomes come back in batch order regardless of finish order.
  #[tokio::test(start_paused = true)]
  async fn test_outcomes_follow_batch_order() {
    let ctx = EngineTestContext::builder(&[]).transient("a", 2).build();
    let blobs = vec![blob("a"), blob("b"), blob("c")];

    let report = dispatcher(&ctx)
      .run_batch(&RunId::new("r"), blobs, "test-index", 3, &CancellationToken::new())
      .await;

    let names: Vec<&str> = report.outcomes.iter().map(|o| o.blob.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(report.published(), 3);
    assert!(!report.cancelled);
  }

  /// Test: the same blob listed twice is only processed once.
  #[tokio::test(start_paused = true)]
  async fn test_duplicate_blobs_are_scheduled_once() {
    let ctx = EngineTestContext::new(&[]);
    let blobs = vec![blob("a"), blob("b"), blob("a")];

    let report = dispatcher(&ctx)
      .run_batch(&RunId::new("r"), blobs, "test-index", 3, &CancellationToken::new())
      .await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(ctx.cracker.calls_for("a"), 1);
  }

  /// Test: a panicking pipeline becomes that document's fatal failure.
  #[tokio::test(start_paused = true)]
  async fn test_panicking_pipeline_is_contained() {
    let ctx = EngineTestContext::builder(&[]).panics("boom").build();
    let blobs = vec![blob("ok-1"), blob("boom"), blob("ok-2")];

    let report = dispatcher(&ctx)
      .run_batch(&RunId::new("r"), blobs, "test-index", 2, &CancellationToken::new())
      .await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.published(), 2);
    let failed = &report.outcomes[1];
    assert_eq!(failed.state, DocumentState::FatalFailure);
    assert_eq!(failed.failure.as_ref().map(|f| f.stage), Some(StageKind::Crack));
  }

  /// Test: after cancellation nothing new starts and the rest is reported.
  #[tokio::test(start_paused = true)]
  async fn test_cancelled_batch_reports_unscheduled_blobs() {
    let ctx = EngineTestContext::new(&[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = dispatcher(&ctx)
      .run_batch(&RunId::new("r"), vec![blob("a"), blob("b")], "test-index", 2, &cancel)
      .await;

    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    assert_eq!(report.unscheduled, vec![blob("a"), blob("b")]);
    assert_eq!(ctx.cracker.total_calls(), 0);
  }

  /// Test: a zero limit still makes progress one document at a time.
  #[tokio::test(start_paused = true)]
  async fn test_zero_limit_runs_serially() {
    let ctx = EngineTestContext::new(&[]);

    let report = dispatcher(&ctx)
      .run_batch(&RunId::new("r"), vec![blob("a"), blob("b")], "test-index", 0, &CancellationToken::new())
      .await;

    assert_eq!(report.published(), 2);
    assert_eq!(ctx.gauge.max(), 1);
  }
}

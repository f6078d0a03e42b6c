//! Run loop tests.
//!
//! Drive whole runs through the orchestrator against in-memory collaborators.

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::atomic::Ordering};

  use docflow_core::{Classification, PaginationCursor};
  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::engine::{
    RunCompletion, RunError, StageKind,
    __tests__::helpers::EngineTestContext,
  };

  fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("docs/{:02}.pdf", i)).collect()
  }

  fn refs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
  }

  /// Test: every blob under the prefix ends up in the index, fully enriched.
  #[tokio::test(start_paused = true)]
  async fn test_healthy_run_publishes_every_blob() {
    let names = names(5);
    let ctx = EngineTestContext::new(&refs(&names));
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 2, 2));

    let completion = ctx
      .orchestrator()
      .run(&mut record, &CancellationToken::new())
      .await
      .expect("run should succeed");

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(record.documents_published, 5);
    assert_eq!(record.batches_completed, 3);
    assert!(record.failures.is_empty());
    assert_eq!(ctx.index.published_blobs(), names.iter().cloned().collect::<HashSet<_>>());
    assert_eq!(ctx.index.documents.len(), 10, "two chunks per document");

    for doc in ctx.index.documents.iter() {
      let chunk = &doc.value().chunk;
      assert!(chunk.embedding.is_some());
      assert!(chunk.entities.is_some());
      assert_eq!(chunk.classification, Some(Classification::Other));
    }
  }

  /// Test: 1 failing + 9 healthy documents → 9 published, 1 failure, run completes.
  #[tokio::test(start_paused = true)]
  async fn test_one_fatal_document_does_not_fail_run() {
    let names = names(10);
    let ctx = EngineTestContext::builder(&refs(&names)).fatal("docs/04.pdf").build();
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 3, 4));

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(record.documents_published, 9);
    assert_eq!(record.failures.len(), 1);
    assert_eq!(record.failures[0].blob_name, "docs/04.pdf");
    assert_eq!(record.failures[0].failure.stage, StageKind::Crack);
    assert_eq!(ctx.index.published_blobs().len(), 9);
    assert!(!ctx.index.published_blobs().contains("docs/04.pdf"));
  }

  /// Test: limit 2 never has more than 2 unfinished pipelines, counting
  /// retry waits and documents that end in failure.
  #[tokio::test(start_paused = true)]
  async fn test_concurrency_limit_bounds_in_flight_pipelines() {
    let names = names(6);
    let ctx = EngineTestContext::builder(&refs(&names))
      .transient("docs/01.pdf", 1)
      .fatal("docs/03.pdf")
      .build();
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 2, 6));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(record.documents_published, 5);
    assert_eq!(record.failures.len(), 1);
    assert_eq!(ctx.gauge.max(), 2);
    assert_eq!(ctx.gauge.current(), 0, "every pipeline reached a terminal state");
  }

  /// Test: a prefix with no blobs after a full one still ends the run cleanly.
  #[tokio::test(start_paused = true)]
  async fn test_empty_final_prefix_completes_run() {
    let ctx = EngineTestContext::new(&["a/1", "a/2", "a/3"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&["a/", "b/"], 4, 10));

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(record.documents_published, 3);
    assert_eq!(ctx.enumerator.calls(), 2);
    assert_eq!(
      record.cursor,
      PaginationCursor {
        prefix_offset: 2,
        continuation_token: None
      }
    );
  }

  /// Test: two single-page prefixes need two listings and then stop.
  #[tokio::test(start_paused = true)]
  async fn test_two_prefixes_run_to_completion() {
    let ctx = EngineTestContext::new(&["a/x", "b/y"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&["a/", "b/"], 4, 10));

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(ctx.enumerator.calls(), 2);
    assert_eq!(record.batches_completed, 2);
    assert_eq!(
      record.cursor,
      PaginationCursor {
        prefix_offset: 2,
        continuation_token: None
      }
    );
    assert_eq!(ctx.cracker.calls_for("a/x"), 1);
    assert_eq!(ctx.cracker.calls_for("b/y"), 1);
  }

  /// Test: an empty prefix in the middle does not end enumeration early.
  #[tokio::test(start_paused = true)]
  async fn test_empty_middle_prefix_is_not_skipped() {
    let ctx = EngineTestContext::new(&["a/1", "c/1"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&["a/", "b/", "c/"], 4, 10));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(record.documents_published, 2);
    assert!(ctx.index.published_blobs().contains("c/1"));
  }

  /// Test: transient crack failures are retried up to the ceiling.
  #[tokio::test(start_paused = true)]
  async fn test_transient_crack_failures_are_retried() {
    let ctx = EngineTestContext::builder(&["ok.pdf", "flaky.pdf", "dead.pdf"])
      .transient("flaky.pdf", 2)
      .transient("dead.pdf", 3)
      .build();
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 3, 3));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.cracker.calls_for("flaky.pdf"), 3);
    assert_eq!(ctx.cracker.calls_for("dead.pdf"), 3);
    assert_eq!(record.documents_published, 2);
    assert_eq!(record.failures.len(), 1);

    let failure = &record.failures[0].failure;
    assert_eq!(record.failures[0].blob_name, "dead.pdf");
    assert_eq!(failure.attempts, 3);
    assert!(failure.exhausted);
  }

  /// Test: a partially rejected upsert is retried as a whole.
  #[tokio::test(start_paused = true)]
  async fn test_partial_upsert_is_retried() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    ctx.index.partial_failures.store(1, Ordering::SeqCst);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.index.upsert_calls.load(Ordering::SeqCst), 2);
    assert_eq!(record.documents_published, 1);
  }

  /// Test: a label outside the vocabulary fails the document, not the run.
  #[tokio::test(start_paused = true)]
  async fn test_unknown_label_fails_document() {
    let ctx = EngineTestContext::builder(&["a.pdf"]).label("InvoiceBlock").build();
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(record.documents_published, 0);
    assert_eq!(record.failures[0].failure.stage, StageKind::Classify);
    assert_eq!(record.failures[0].failure.attempts, 1);
    assert!(ctx.index.documents.is_empty());
  }

  /// Test: an embedder returning the wrong number of vectors fails the document.
  #[tokio::test(start_paused = true)]
  async fn test_misaligned_embeddings_fail_document() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    ctx.embedder.misaligned.store(true, Ordering::SeqCst);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(record.failures.len(), 1);
    assert_eq!(record.failures[0].failure.stage, StageKind::Embed);
    assert_eq!(ctx.classifier.calls.load(Ordering::SeqCst), 0);
  }

  /// Test: index creation that never succeeds fails the run before enumeration.
  #[tokio::test(start_paused = true)]
  async fn test_ensure_index_failure_fails_run() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    ctx.index.ensure_failures.store(3, Ordering::SeqCst);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));

    let err = ctx
      .orchestrator()
      .run(&mut record, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, RunError::EnsureIndex { .. }));
    assert_eq!(ctx.index.ensure_calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.enumerator.calls(), 0);
  }

  /// Test: index creation recovers from a transient failure.
  #[tokio::test(start_paused = true)]
  async fn test_ensure_index_is_retried() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    ctx.index.ensure_failures.store(1, Ordering::SeqCst);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(ctx.index.ensure_calls.load(Ordering::SeqCst), 2);
  }

  /// Test: invalid parameters are rejected before any collaborator is called.
  #[tokio::test]
  async fn test_invalid_request_fails_before_enumeration() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 0, 1));

    let err = ctx
      .orchestrator()
      .run(&mut record, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, RunError::Configuration(_)));
    assert_eq!(ctx.index.ensure_calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.enumerator.calls(), 0);
  }

  /// Test: a cursor past the end of the prefix list is never clamped.
  #[tokio::test]
  async fn test_corrupt_cursor_is_rejected() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&["a", "b"], 1, 1));
    record.cursor.prefix_offset = 3;

    let err = ctx
      .orchestrator()
      .run(&mut record, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, RunError::CursorCorruption(_)));
    assert_eq!(ctx.enumerator.calls(), 0);
  }

  /// Test: exhausted enumeration retries fail the run but keep the cursor.
  #[tokio::test(start_paused = true)]
  async fn test_enumeration_failure_keeps_cursor() {
    let ctx = EngineTestContext::new(&["a.pdf", "b.pdf"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));
    ctx.enumerator.broken_after.store(1, Ordering::SeqCst);

    let err = ctx
      .orchestrator()
      .run(&mut record, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, RunError::Enumeration(_)));
    assert_eq!(record.cursor.prefix_offset, 0);
    assert!(record.cursor.continuation_token.is_some());
    assert_eq!(record.batches_completed, 1);
    assert!(ctx.index.published_blobs().contains("a.pdf"));
  }

  /// Test: per-document checkpoints are gone once the run completes.
  #[tokio::test(start_paused = true)]
  async fn test_document_checkpoints_cleared_after_batches() {
    let ctx = EngineTestContext::new(&["a.pdf", "b.pdf", "c.pdf"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 2, 2));

    ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.checkpoints.document_count(&record.run_id), 0);
  }
}

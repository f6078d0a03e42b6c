//! Resume and replay tests.
//!
//! A restarted pipeline or run must pick up from its checkpoints without
//! repeating finished work or producing different index contents.

#[cfg(test)]
mod tests {
  use std::{collections::BTreeMap, sync::Arc, sync::atomic::Ordering, time::Duration};

  use docflow_core::{Chunk, Classification, ContinuationToken, CrackedDocument, PaginationCursor, RunId};
  use pretty_assertions::assert_eq;
  use tokio_util::sync::CancellationToken;

  use crate::{
    collab::{EntityExtractor, IndexDocument, entities::RegexEntityExtractor},
    engine::{
      DocumentJob, DocumentPipeline, DocumentProgress, DocumentState, RunCompletion,
      __tests__::helpers::{EngineTestContext, blob, fast_policy},
    },
    runtime::CheckpointStore,
  };

  const NAME: &str = "contracts/msa.pdf";

  fn job() -> DocumentJob {
    DocumentJob {
      run_id: RunId::new("run-1"),
      blob: blob(NAME),
      index_name: "test-index".to_string(),
    }
  }

  /// Progress exactly as the fake collaborators would have produced it up to `state`.
  fn progress_at(state: DocumentState) -> DocumentProgress {
    let reached = |s: DocumentState| (state as u8) >= (s as u8);
    let mut progress = DocumentProgress {
      state,
      ..Default::default()
    };
    if reached(DocumentState::Cracked) {
      progress.document = Some(CrackedDocument {
        pages: vec![format!("first page of {}", NAME), format!("second page of {}", NAME)],
        url: blob(NAME).url,
        filename: "msa.pdf".to_string(),
      });
    }
    if reached(DocumentState::Chunked) {
      let pages = progress.document.as_ref().map(|d| d.pages.clone()).unwrap_or_default();
      progress.chunks = pages.into_iter().map(Chunk::new).collect();
    }
    for chunk in progress.chunks.iter_mut() {
      if reached(DocumentState::Embedded) {
        chunk.fill_embedding(vec![chunk.text.len() as f32, 1.0]);
      }
      if reached(DocumentState::EntitiesExtracted) {
        chunk.fill_entities(RegexEntityExtractor.extract(&chunk.text));
      }
      if reached(DocumentState::Classified) {
        chunk.fill_classification(Classification::Other);
      }
    }
    progress
  }

  fn index_contents(ctx: &EngineTestContext) -> BTreeMap<String, IndexDocument> {
    ctx
      .index
      .documents
      .iter()
      .map(|d| (d.key().clone(), d.value().clone()))
      .collect()
  }

  /// Test: resuming from any intermediate state skips finished stages and
  /// publishes exactly what an uninterrupted run publishes.
  #[tokio::test(start_paused = true)]
  async fn test_resume_from_every_intermediate_state() {
    let baseline = EngineTestContext::new(&[NAME]);
    let pipeline = DocumentPipeline::new(baseline.collaborators(), baseline.store(), fast_policy());
    let outcome = pipeline.run(&job()).await;
    assert!(outcome.is_published());
    let expected = index_contents(&baseline);
    assert_eq!(expected.len(), 2);

    let states = [
      DocumentState::Cracked,
      DocumentState::Chunked,
      DocumentState::Embedded,
      DocumentState::EntitiesExtracted,
      DocumentState::Classified,
    ];
    for state in states {
      let ctx = EngineTestContext::new(&[NAME]);
      ctx
        .checkpoints
        .save_document(&job().run_id, NAME, &progress_at(state))
        .await
        .unwrap();

      let pipeline = DocumentPipeline::new(ctx.collaborators(), ctx.store(), fast_policy());
      let outcome = pipeline.run(&job()).await;

      assert!(outcome.is_published(), "resume from {:?}", state);
      assert_eq!(ctx.cracker.calls_for(NAME), 0, "crack replayed from {:?}", state);
      let embeds = ctx.embedder.calls.load(Ordering::SeqCst);
      assert_eq!(embeds, usize::from(state == DocumentState::Cracked || state == DocumentState::Chunked));
      let classifies = ctx.classifier.calls.load(Ordering::SeqCst);
      assert_eq!(classifies, usize::from(state != DocumentState::Classified));
      assert_eq!(index_contents(&ctx), expected, "index differs when resuming from {:?}", state);
    }
  }

  /// Test: a document already published is not published again.
  #[tokio::test]
  async fn test_published_document_is_left_alone() {
    let ctx = EngineTestContext::new(&[NAME]);
    ctx
      .checkpoints
      .save_document(&job().run_id, NAME, &progress_at(DocumentState::Published))
      .await
      .unwrap();

    let pipeline = DocumentPipeline::new(ctx.collaborators(), ctx.store(), fast_policy());
    let outcome = pipeline.run(&job()).await;

    assert!(outcome.is_published());
    assert_eq!(ctx.cracker.total_calls(), 0);
    assert_eq!(ctx.index.upsert_calls.load(Ordering::SeqCst), 0);
  }

  /// Test: a restarted run continues from its persisted cursor.
  #[tokio::test(start_paused = true)]
  async fn test_run_resumes_from_persisted_cursor() {
    let names = ["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"];
    let ctx = EngineTestContext::new(&names);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 2, 2));
    record.cursor = PaginationCursor {
      prefix_offset: 0,
      continuation_token: Some(ContinuationToken::new("2")),
    };
    record.documents_published = 2;
    record.batches_completed = 1;

    let completion = ctx.orchestrator().run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(ctx.cracker.total_calls(), 3);
    assert_eq!(ctx.cracker.calls_for("a.pdf"), 0);
    assert_eq!(record.documents_published, 5);
    assert_eq!(record.batches_completed, 3);
  }

  /// Test: replaying a whole run leaves the index unchanged.
  #[tokio::test(start_paused = true)]
  async fn test_replayed_run_is_idempotent() {
    let ctx = EngineTestContext::new(&["a.pdf", "b.pdf", "c.pdf"]);
    let request = EngineTestContext::request(&[""], 2, 2);

    let mut first = ctx.record("run-1", request.clone());
    ctx.orchestrator().run(&mut first, &CancellationToken::new()).await.unwrap();
    let after_first = index_contents(&ctx);

    // Crash before any cursor checkpoint: the same run starts from scratch
    let mut replay = ctx.record("run-1", request);
    ctx.orchestrator().run(&mut replay, &CancellationToken::new()).await.unwrap();

    assert_eq!(index_contents(&ctx), after_first);
    assert_eq!(after_first.len(), 6);
  }

  /// Test: a run cancelled before its first batch does no enumeration.
  #[tokio::test]
  async fn test_cancel_before_start() {
    let ctx = EngineTestContext::new(&["a.pdf"]);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 1, 1));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let completion = ctx.orchestrator().run(&mut record, &cancel).await.unwrap();

    assert_eq!(completion, RunCompletion::Cancelled);
    assert_eq!(ctx.enumerator.calls(), 0);
    assert_eq!(record.cursor, PaginationCursor::start());
  }

  /// Test: cancelling mid-batch lets in-flight documents finish, records
  /// nothing for the batch, and a resumed run only does the remaining work.
  #[tokio::test(start_paused = true)]
  async fn test_cancel_mid_batch_then_resume() {
    let names = ["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"];
    let ctx = EngineTestContext::new(&names);
    let mut record = ctx.record("run-1", EngineTestContext::request(&[""], 2, 5));
    let orchestrator = Arc::new(ctx.orchestrator());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      trigger.cancel();
    });

    let completion = orchestrator.run(&mut record, &cancel).await.unwrap();

    assert_eq!(completion, RunCompletion::Cancelled);
    assert_eq!(ctx.cracker.total_calls(), 2, "only the in-flight pair started");
    assert_eq!(ctx.index.published_blobs().len(), 2, "in-flight documents finished");
    assert_eq!(record.cursor, PaginationCursor::start());
    assert_eq!(record.batches_completed, 0);
    assert_eq!(ctx.checkpoints.document_count(&record.run_id), 2);

    let completion = orchestrator.run(&mut record, &CancellationToken::new()).await.unwrap();

    assert_eq!(completion, RunCompletion::Completed);
    assert_eq!(ctx.cracker.total_calls(), 5, "finished documents are not cracked again");
    assert_eq!(record.documents_published, 5);
    assert_eq!(ctx.index.published_blobs().len(), 5);
  }
}

//! Batch enumeration across an ordered prefix list

use docflow_core::{BlobRef, PaginationCursor};

use crate::collab::{CollaboratorError, Enumerator};

/// Fetch the next batch of blobs and the cursor that follows it.
///
/// Once every prefix is exhausted this returns an empty batch and the same
/// cursor without calling the enumerator, which is how callers detect the end.
/// An empty page for a non-final prefix still advances the cursor, so callers
/// must compare cursors rather than treat an empty batch as the end.
pub async fn next_batch(
  enumerator: &dyn Enumerator,
  container: &str,
  cursor: &PaginationCursor,
  prefixes: &[String],
  batch_size: usize,
) -> Result<(Vec<BlobRef>, PaginationCursor), CollaboratorError> {
  if cursor.is_exhausted(prefixes.len()) {
    return Ok((Vec::new(), cursor.clone()));
  }

  let prefix = &prefixes[cursor.prefix_offset];
  let page = enumerator
    .list_page(container, prefix, cursor.continuation_token.as_ref(), batch_size)
    .await?;

  Ok((page.blobs, cursor.advance(page.next_token)))
}

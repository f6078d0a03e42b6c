//! Paragraph chunker
//!
//! Splits pages on blank lines and packs consecutive paragraphs into chunks of
//! at most `max_chars` characters. A paragraph longer than the limit is cut at
//! the nearest whitespace before the limit (or hard at the limit if there is
//! none). Chunks never span pages.

use docflow_core::Chunk;

use super::{Chunker, CollaboratorError};

#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
  max_chars: usize,
}

impl ParagraphChunker {
  pub fn new(max_chars: usize) -> Self {
    Self {
      max_chars: max_chars.max(1),
    }
  }

  fn chunk_page(&self, page: &str, out: &mut Vec<Chunk>) {
    let mut current = String::new();

    for paragraph in page.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
      let paragraph_len = paragraph.chars().count();
      let current_len = current.chars().count();

      if !current.is_empty() && current_len + 2 + paragraph_len > self.max_chars {
        out.push(Chunk::new(std::mem::take(&mut current)));
      }

      if paragraph_len > self.max_chars {
        for piece in split_long(paragraph, self.max_chars) {
          out.push(Chunk::new(piece));
        }
        continue;
      }

      if !current.is_empty() {
        current.push_str("\n\n");
      }
      current.push_str(paragraph);
    }

    if !current.is_empty() {
      out.push(Chunk::new(current));
    }
  }
}

/// Cut `text` into pieces of at most `max_chars` characters, preferring
/// whitespace boundaries.
fn split_long(text: &str, max_chars: usize) -> Vec<String> {
  let mut pieces = Vec::new();
  let mut rest = text;

  while rest.chars().count() > max_chars {
    let limit = rest.char_indices().nth(max_chars).map(|(i, _)| i).unwrap_or(rest.len());
    let cut = rest[..limit]
      .rfind(char::is_whitespace)
      .filter(|&i| i > 0)
      .unwrap_or(limit);
    pieces.push(rest[..cut].trim_end().to_string());
    rest = rest[cut..].trim_start();
  }
  if !rest.is_empty() {
    pieces.push(rest.to_string());
  }
  pieces
}

impl Chunker for ParagraphChunker {
  fn chunk(&self, pages: &[String]) -> Result<Vec<Chunk>, CollaboratorError> {
    let mut chunks = Vec::new();
    for page in pages {
      self.chunk_page(page, &mut chunks);
    }
    if chunks.is_empty() {
      return Err(CollaboratorError::fatal("document has no text to chunk"));
    }
    Ok(chunks)
  }
}

//! Search command

use anyhow::{Context, Result};
use docflow::collab::index::{JsonFileIndex, SearchHit};
use docflow_core::Config;

/// Characters of chunk text shown per hit
const PREVIEW_CHARS: usize = 120;

/// Look up chunks in a published index by plain terms.
pub async fn cmd_search(config: &Config, query: &str, index: Option<&str>, limit: usize, json: bool) -> Result<()> {
  let index_name = index.unwrap_or(&config.run.index_name);
  let hits = JsonFileIndex::new(config.local.index_dir.clone())
    .search(index_name, query, limit)
    .await
    .with_context(|| format!("Failed to search index {}", index_name))?;

  if json {
    println!("{}", serde_json::to_string_pretty(&hits)?);
    return Ok(());
  }

  if hits.is_empty() {
    println!("No results for {:?} in {}", query, index_name);
    return Ok(());
  }

  println!("Found {} result(s) in {}:\n", hits.len(), index_name);
  for (i, hit) in hits.iter().enumerate() {
    print_hit(i + 1, hit);
  }
  Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
  let classification = hit.classification.map(|c| c.as_str()).unwrap_or("(unclassified)");
  println!("{}. {} [{}] score {}", rank, hit.id, classification, hit.score);
  println!("   File: {} (chunk {})", hit.filename, hit.chunk_index);
  println!("   URL:  {}", hit.storage_url);
  println!("   {}", preview(&hit.content));
  println!();
}

fn preview(text: &str) -> String {
  let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
  if flat.chars().count() <= PREVIEW_CHARS {
    return flat;
  }
  let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
  format!("{}...", cut)
}

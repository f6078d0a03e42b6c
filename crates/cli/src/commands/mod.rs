//! CLI command implementations

mod config;
mod run;
mod search;
mod status;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use docflow::{
  CheckpointStore, Collaborators, FileCheckpointStore, RetryPolicy, Runtime,
  collab::{
    chunker::ParagraphChunker,
    entities::RegexEntityExtractor,
    index::JsonFileIndex,
    local::{LocalDirEnumerator, TextFileCracker},
    ollama::{OllamaClassifier, OllamaEmbedder},
  },
};
use docflow_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use config::{cmd_config_init, cmd_config_show};
pub use run::{cmd_event, cmd_resume, cmd_run};
pub use search::cmd_search;
pub use status::{cmd_health, cmd_status};

/// Load the effective config and apply environment overrides once.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
  let mut config = match explicit {
    Some(path) => Config::load_from(path).with_context(|| format!("Failed to load config {:?}", path))?,
    None => {
      let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
      Config::load_for_project(&cwd)
    }
  };
  config
    .apply_env(|key| std::env::var(key).ok())
    .context("Invalid environment override")?;
  Ok(config)
}

fn checkpoint_store(config: &Config) -> Arc<dyn CheckpointStore> {
  Arc::new(FileCheckpointStore::new(config.state.resolved_dir()))
}

/// Wire the local adapters into a runtime.
fn build_runtime(config: &Config) -> Runtime {
  let collaborators = Collaborators {
    enumerator: Arc::new(LocalDirEnumerator::new(config.local.root.clone())),
    cracker: Arc::new(TextFileCracker),
    chunker: Arc::new(ParagraphChunker::new(config.local.max_chunk_chars)),
    embedder: Arc::new(OllamaEmbedder::new(&config.embedding)),
    extractor: Arc::new(RegexEntityExtractor),
    classifier: Arc::new(OllamaClassifier::new(&config.classifier)),
    publisher: Arc::new(JsonFileIndex::new(config.local.index_dir.clone())),
  };
  Runtime::new(
    collaborators,
    checkpoint_store(config),
    RetryPolicy::from_config(&config.retry),
    CancellationToken::new(),
  )
}

/// Park every live run on the first Ctrl-C.
fn shutdown_on_ctrl_c(runtime: &Runtime) {
  let runtime = runtime.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("Interrupted, waiting for in-flight documents before parking runs");
      runtime.shutdown();
    }
  });
}

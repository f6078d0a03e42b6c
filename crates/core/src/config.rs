//! Configuration system for docflow.
//!
//! Config priority: explicit path > project-relative (.docflow/config.toml) > user
//! (~/.config/docflow/config.toml) > defaults.
//!
//! The config is loaded once at process start and passed down by value or
//! reference. Nothing below the CLI reads the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating configuration and run parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("missing required run parameter: {0}")]
  MissingParameter(&'static str),
  #[error("invalid value for {name}: {reason}")]
  InvalidParameter { name: &'static str, reason: String },
  #[error("failed to read config {path:?}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse config {path:?}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Run Configuration
// ============================================================================

/// Defaults applied to every run request that does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Object-store container that holds the source documents
  pub container_name: String,

  /// Search index that receives the enriched chunks
  pub index_name: String,

  /// Maximum number of documents processed concurrently (default: 20)
  pub concurrency_limit: usize,

  /// Blobs requested per enumeration page.
  /// Defaults to `concurrency_limit` when not set.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub batch_size: Option<usize>,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      container_name: "contracts".to_string(),
      index_name: "lumen-contracts-index".to_string(),
      concurrency_limit: 20,
      batch_size: None,
    }
  }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Fixed-interval retry settings for one class of stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRetryConfig {
  /// Delay between attempts in milliseconds
  pub base_delay_ms: u64,
  /// Total attempts including the first one
  pub max_attempts: u32,
  /// Deadline for a single collaborator call in seconds
  pub call_timeout_secs: u64,
}

/// Retry settings per stage class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Document cracking (layout extraction)
  pub cracking: StageRetryConfig,
  /// Every other stage that calls an external service
  pub service: StageRetryConfig,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      cracking: StageRetryConfig {
        base_delay_ms: 3_000,
        max_attempts: 3,
        call_timeout_secs: 300,
      },
      service: StageRetryConfig {
        base_delay_ms: 60_000,
        max_attempts: 3,
        call_timeout_secs: 120,
      },
    }
  }
}

// ============================================================================
// State Configuration
// ============================================================================

/// Where run checkpoints are stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
  /// Checkpoint directory (default: platform data dir / docflow / state)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dir: Option<PathBuf>,
}

impl StateConfig {
  pub fn resolved_dir(&self) -> PathBuf {
    self.dir.clone().unwrap_or_else(default_state_dir)
  }
}

fn default_state_dir() -> PathBuf {
  if let Some(dir) = dirs::data_dir() {
    return dir.join("docflow").join("state");
  }
  PathBuf::from(".docflow").join("state")
}

// ============================================================================
// Local Adapters
// ============================================================================

/// Settings for the local filesystem adapters used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
  /// Directory whose subdirectories act as containers
  pub root: PathBuf,

  /// Directory holding one JSON file per search index
  pub index_dir: PathBuf,

  /// Maximum characters per chunk produced by the paragraph chunker
  pub max_chunk_chars: usize,
}

impl Default for LocalConfig {
  fn default() -> Self {
    Self {
      root: PathBuf::from("."),
      index_dir: PathBuf::from(".docflow").join("indexes"),
      max_chunk_chars: 2000,
    }
  }
}

/// Embedding service settings (Ollama)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub ollama_url: String,
  pub model: String,
  /// Maximum texts per request; larger inputs are split into sub-batches
  pub max_batch_size: usize,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      ollama_url: "http://localhost:11434".to_string(),
      model: "nomic-embed-text".to_string(),
      max_batch_size: 64,
    }
  }
}

/// Classification service settings (Ollama)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
  pub ollama_url: String,
  pub model: String,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      ollama_url: "http://localhost:11434".to_string(),
      model: "llama3.2".to_string(),
    }
  }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,

  /// Log file rotation: "daily", "hourly", "never"
  pub rotation: String,

  /// Log to files in this directory instead of the console
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
      dir: None,
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// docflow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(default)]
  pub run: RunConfig,

  #[serde(default)]
  pub retry: RetryConfig,

  #[serde(default)]
  pub state: StateConfig,

  #[serde(default)]
  pub local: LocalConfig,

  #[serde(default)]
  pub embedding: EmbeddingConfig,

  #[serde(default)]
  pub classifier: ClassifierConfig,

  #[serde(default)]
  pub log: LogConfig,
}

impl Config {
  /// Load config from an explicit file. Errors are reported, not swallowed.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load config for a project directory, with fallback to user config
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(config) = Self::load_from(&project_config)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(config) = Self::load_from(&user_config_path)
    {
      return config;
    }

    Self::default()
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("DOCFLOW_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
      return Some(PathBuf::from(path).join("docflow").join("config.toml"));
    }

    dirs::config_dir().map(|p: PathBuf| p.join("docflow").join("config.toml"))
  }

  /// Get the project-relative config path
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".docflow").join("config.toml")
  }

  /// Apply the deployment environment variables on top of file config.
  ///
  /// `lookup` is `std::env::var` in production; tests pass a map.
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(value) = lookup("BLOB_AMOUNT_PARALLEL") {
      let parsed = value.trim().parse::<usize>().map_err(|e| ConfigError::InvalidParameter {
        name: "BLOB_AMOUNT_PARALLEL",
        reason: e.to_string(),
      })?;
      self.run.concurrency_limit = parsed;
    }
    if let Some(value) = lookup("SEARCH_INDEX_NAME") {
      self.run.index_name = value;
    }
    if let Some(value) = lookup("BLOB_CONTAINER_NAME") {
      self.run.container_name = value;
    }
    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# docflow Configuration
# Place in .docflow/config.toml (project) or ~/.config/docflow/config.toml (user)

# ============================================================================
# Run Defaults
# ============================================================================

[run]
# Container holding the source documents
# Can also be set via BLOB_CONTAINER_NAME
container_name = "{container}"

# Target search index
# Can also be set via SEARCH_INDEX_NAME
index_name = "{index}"

# Documents processed in parallel
# Can also be set via BLOB_AMOUNT_PARALLEL
concurrency_limit = {concurrency}

# Blobs per enumeration page (defaults to concurrency_limit)
# batch_size = 20

# ============================================================================
# Retries (fixed interval)
# ============================================================================

[retry.cracking]
base_delay_ms = {crack_delay}
max_attempts = {crack_attempts}
call_timeout_secs = {crack_timeout}

[retry.service]
base_delay_ms = {svc_delay}
max_attempts = {svc_attempts}
call_timeout_secs = {svc_timeout}

# ============================================================================
# Checkpoints
# ============================================================================

[state]
# dir = "/var/lib/docflow/state"

# ============================================================================
# Local Adapters
# ============================================================================

[local]
root = "."
index_dir = ".docflow/indexes"
max_chunk_chars = {max_chunk_chars}

[embedding]
ollama_url = "{embed_url}"
model = "{embed_model}"
max_batch_size = {embed_batch}

[classifier]
ollama_url = "{classify_url}"
model = "{classify_model}"

# ============================================================================
# Logging
# ============================================================================

[log]
level = "info"
# daily, hourly, never
rotation = "daily"
# dir = "/var/log/docflow"
"#,
      container = defaults.run.container_name,
      index = defaults.run.index_name,
      concurrency = defaults.run.concurrency_limit,
      crack_delay = defaults.retry.cracking.base_delay_ms,
      crack_attempts = defaults.retry.cracking.max_attempts,
      crack_timeout = defaults.retry.cracking.call_timeout_secs,
      svc_delay = defaults.retry.service.base_delay_ms,
      svc_attempts = defaults.retry.service.max_attempts,
      svc_timeout = defaults.retry.service.call_timeout_secs,
      max_chunk_chars = defaults.local.max_chunk_chars,
      embed_url = defaults.embedding.ollama_url,
      embed_model = defaults.embedding.model,
      embed_batch = defaults.embedding.max_batch_size,
      classify_url = defaults.classifier.ollama_url,
      classify_model = defaults.classifier.model,
    )
  }
}

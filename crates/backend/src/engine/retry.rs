//! Per-stage retry policy
//!
//! Two tiers: the cracking tier (slow, rate limited layout extraction) and the
//! service tier (everything else that crosses the network). Chunking is pure
//! and never retried. Delays are fixed, not exponential.

use std::{fmt, time::Duration};

use docflow_core::{RetryConfig, StageRetryConfig};
use serde::{Deserialize, Serialize};

/// Every retryable unit of work the engine performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
  Enumerate,
  EnsureIndex,
  Crack,
  Chunk,
  Embed,
  ExtractEntities,
  Classify,
  Publish,
}

impl StageKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StageKind::Enumerate => "enumerate",
      StageKind::EnsureIndex => "ensure_index",
      StageKind::Crack => "crack",
      StageKind::Chunk => "chunk",
      StageKind::Embed => "embed",
      StageKind::ExtractEntities => "extract_entities",
      StageKind::Classify => "classify",
      StageKind::Publish => "publish",
    }
  }
}

impl fmt::Display for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What to do after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  RetryAfter(Duration),
  GiveUp,
}

/// Retry settings for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
  pub base_delay: Duration,
  /// Total attempts including the first
  pub max_attempts: u32,
  /// Upper bound on a single collaborator call
  pub call_timeout: Duration,
}

impl StagePolicy {
  fn from_config(config: &StageRetryConfig) -> Self {
    Self {
      base_delay: Duration::from_millis(config.base_delay_ms),
      max_attempts: config.max_attempts.max(1),
      call_timeout: Duration::from_secs(config.call_timeout_secs),
    }
  }

  fn single_attempt(&self) -> Self {
    Self {
      max_attempts: 1,
      ..*self
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  cracking: StagePolicy,
  service: StagePolicy,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_config(&RetryConfig::default())
  }
}

impl RetryPolicy {
  pub fn from_config(config: &RetryConfig) -> Self {
    Self {
      cracking: StagePolicy::from_config(&config.cracking),
      service: StagePolicy::from_config(&config.service),
    }
  }

  pub fn policy_for(&self, stage: StageKind) -> StagePolicy {
    match stage {
      StageKind::Crack => self.cracking,
      StageKind::Chunk => self.service.single_attempt(),
      StageKind::Enumerate
      | StageKind::EnsureIndex
      | StageKind::Embed
      | StageKind::ExtractEntities
      | StageKind::Classify
      | StageKind::Publish => self.service,
    }
  }

  /// Decide what happens after `attempt` (1-based) failed with a retryable error.
  pub fn decide(&self, stage: StageKind, attempt: u32) -> RetryDecision {
    let policy = self.policy_for(stage);
    if attempt < policy.max_attempts {
      RetryDecision::RetryAfter(policy.base_delay)
    } else {
      RetryDecision::GiveUp
    }
  }

  pub fn call_timeout(&self, stage: StageKind) -> Duration {
    self.policy_for(stage).call_timeout
  }
}

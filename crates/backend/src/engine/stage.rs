//! Stage execution with retries
//!
//! [`run_stage`] is the only place the engine sleeps or applies a deadline.
//! Each attempt is bounded by the stage's call timeout; a timeout counts as a
//! retryable failure.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::retry::{RetryDecision, RetryPolicy, StageKind};
use crate::collab::CollaboratorError;

/// Outcome of a single stage attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult<T> {
  Success(T),
  RetryableFailure(String),
  FatalFailure(String),
}

impl<T> From<Result<T, CollaboratorError>> for StageResult<T> {
  fn from(result: Result<T, CollaboratorError>) -> Self {
    match result {
      Ok(value) => StageResult::Success(value),
      Err(CollaboratorError::Transient(reason)) => StageResult::RetryableFailure(reason),
      Err(CollaboratorError::Fatal(reason)) => StageResult::FatalFailure(reason),
    }
  }
}

/// Why a stage ultimately did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} failed after {attempts} attempt(s): {reason}")]
pub struct StageFailure {
  pub stage: StageKind,
  pub attempts: u32,
  pub reason: String,
  /// True when the last failure was retryable and the ceiling was reached
  pub exhausted: bool,
}

impl StageFailure {
  /// A failure detected by the engine itself (alignment checks, bad labels).
  pub fn fatal(stage: StageKind, reason: impl Into<String>) -> Self {
    Self {
      stage,
      attempts: 1,
      reason: reason.into(),
      exhausted: false,
    }
  }
}

/// Run `call` under the retry policy for `stage`.
///
/// `call` is invoked once per attempt, so it must rebuild its future each time.
/// Fatal failures are returned immediately; retryable ones sleep the tier's
/// fixed delay and try again until the attempt ceiling.
pub async fn run_stage<T, F, Fut>(policy: &RetryPolicy, stage: StageKind, mut call: F) -> Result<T, StageFailure>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, CollaboratorError>>,
{
  let deadline = policy.call_timeout(stage);
  let mut attempt: u32 = 1;

  loop {
    let result = match timeout(deadline, call()).await {
      Ok(result) => StageResult::from(result),
      Err(_) => StageResult::RetryableFailure(format!("call timed out after {}s", deadline.as_secs_f64())),
    };

    match result {
      StageResult::Success(value) => {
        if attempt > 1 {
          info!(stage = %stage, attempt, "Stage succeeded after retry");
        }
        return Ok(value);
      }
      StageResult::FatalFailure(reason) => {
        warn!(stage = %stage, attempt, err = %reason, "Fatal stage failure");
        return Err(StageFailure {
          stage,
          attempts: attempt,
          reason,
          exhausted: false,
        });
      }
      StageResult::RetryableFailure(reason) => match policy.decide(stage, attempt) {
        RetryDecision::RetryAfter(delay) => {
          warn!(
            stage = %stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            err = %reason,
            "Retryable stage failure, will retry"
          );
          sleep(delay).await;
          attempt += 1;
          debug!(stage = %stage, attempt, "Retrying stage");
        }
        RetryDecision::GiveUp => {
          warn!(stage = %stage, attempt, err = %reason, "All retries exhausted");
          return Err(StageFailure {
            stage,
            attempts: attempt,
            reason,
            exhausted: true,
          });
        }
      },
    }
  }
}

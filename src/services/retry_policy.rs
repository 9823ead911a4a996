//! Retry policy: turns an execution outcome into a guarded task transition.
//!
//! Requeued tasks wait `base * 2^(attempt - 1)` before they become runnable
//! again, capped at the configured maximum.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionOutcome, LogStream, OrchestrationConfig, RetryDecision, Task};
use crate::domain::ports::{TaskRepository, TaskTransition};

/// Decide what an outcome means for a task that has been charged
/// `retry_count` failed attempts so far.
pub fn decide(retry_count: u32, outcome: &ExecutionOutcome, max_retries: u32) -> RetryDecision {
    match outcome {
        ExecutionOutcome::Success { .. } => RetryDecision::Completed,
        ExecutionOutcome::Aborted => RetryDecision::Skipped,
        ExecutionOutcome::Failure { .. }
        | ExecutionOutcome::Timeout { .. }
        | ExecutionOutcome::ProvisionFailed { .. } => {
            let attempts = retry_count.saturating_add(1);
            if attempts <= max_retries {
                RetryDecision::Requeue { retry_count: attempts }
            } else {
                RetryDecision::Failed { retry_count: attempts }
            }
        }
    }
}

const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Doubling stops mattering long before this many steps.
const MAX_BACKOFF_STEPS: u32 = 64;

/// Delay before retry number `attempt` (1-based).
pub fn retry_delay(config: &OrchestrationConfig, attempt: u32) -> Duration {
    let base = config.retry_base_delay();
    let cap = config.retry_max_delay();
    if base.is_zero() || attempt == 0 {
        return Duration::ZERO;
    }

    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(base)
        .with_multiplier(BACKOFF_MULTIPLIER)
        .with_randomization_factor(0.0)
        .with_max_interval(cap)
        .with_max_elapsed_time(None)
        .build();
    let mut delay = base;
    for _ in 0..attempt.min(MAX_BACKOFF_STEPS) {
        delay = backoff.next_backoff().unwrap_or(cap);
    }
    delay.min(cap)
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    if delay.is_zero() {
        return None;
    }
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

pub struct RetryPolicy<T: TaskRepository> {
    task_repo: Arc<T>,
}

impl<T: TaskRepository> RetryPolicy<T> {
    pub fn new(task_repo: Arc<T>) -> Self {
        Self { task_repo }
    }

    /// Apply an outcome to `task` as a conditional store update.
    ///
    /// Returns [`RetryDecision::Skipped`] when the task moved on concurrently
    /// (cancelled, or otherwise no longer in the expected status).
    pub async fn on_outcome(
        &self,
        task: &Task,
        outcome: &ExecutionOutcome,
        config: &OrchestrationConfig,
    ) -> DomainResult<RetryDecision> {
        let decision = decide(task.retry_count, outcome, config.max_retries);
        let error = outcome.error_message().unwrap_or_default();
        let delay = match decision {
            RetryDecision::Requeue { retry_count } => retry_delay(config, retry_count),
            _ => Duration::ZERO,
        };

        let transition = match (decision, outcome) {
            (RetryDecision::Completed, ExecutionOutcome::Success { result }) => {
                TaskTransition::Complete { result: result.clone() }
            }
            (RetryDecision::Requeue { retry_count }, _) => TaskTransition::Requeue {
                retry_count,
                error: error.clone(),
                retry_after: retry_at(Utc::now(), delay),
            },
            (RetryDecision::Failed { retry_count }, _) => TaskTransition::Fail {
                retry_count,
                error: error.clone(),
            },
            _ => return Ok(RetryDecision::Skipped),
        };

        if !self.task_repo.transition(task.id, transition).await? {
            tracing::info!(
                task_id = %task.id,
                outcome = outcome.kind(),
                "Task changed concurrently; outcome discarded"
            );
            return Ok(RetryDecision::Skipped);
        }

        let note = match decision {
            RetryDecision::Completed => {
                tracing::info!(task_id = %task.id, "Task completed");
                "Task completed".to_string()
            }
            RetryDecision::Requeue { retry_count } => {
                tracing::warn!(
                    task_id = %task.id,
                    retry_count,
                    max_retries = config.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Task attempt failed; requeued"
                );
                format!(
                    "Attempt {retry_count} failed ({error}); requeued, retry in {}s",
                    delay.as_secs()
                )
            }
            RetryDecision::Failed { retry_count } => {
                tracing::error!(
                    task_id = %task.id,
                    retry_count,
                    error = %error,
                    "Task failed after exhausting retries"
                );
                format!("Attempt {retry_count} failed ({error}); no retries left")
            }
            RetryDecision::Skipped => return Ok(decision),
        };
        if let Err(e) = self.task_repo.append_log(task.id, LogStream::System, &note).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to append task log");
        }

        Ok(decision)
    }
}

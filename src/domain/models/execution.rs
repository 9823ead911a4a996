//! Execution outcomes, retry decisions and task log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Result of one execution attempt as reported by the task executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Provider reported a zero exit status
    Success { result: String },
    /// Provider reported an error or non-zero exit status
    Failure {
        error: String,
        /// The sandbox itself is unusable and must be destroyed
        fatal: bool,
    },
    /// No completion signal within the execution timeout
    Timeout { after: Duration },
    /// Sandbox provisioning failed before the task ever ran
    ProvisionFailed { error: String },
    /// Execution was cancelled; the task status is already settled
    Aborted,
}

impl ExecutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Timeout { .. } => "timeout",
            Self::ProvisionFailed { .. } => "provision_failed",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the sandbox that produced this outcome should be destroyed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failure { fatal: true, .. })
    }

    /// Human-readable error for failed outcomes.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Failure { error, .. } | Self::ProvisionFailed { error } => Some(error.clone()),
            Self::Timeout { after } => {
                Some(format!("Execution timed out after {}s", after.as_secs()))
            }
            Self::Success { .. } | Self::Aborted => None,
        }
    }
}

/// What the retry policy did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    Completed,
    Requeue { retry_count: u32 },
    Failed { retry_count: u32 },
    /// The task moved on concurrently (cancelled or retried); nothing written
    Skipped,
}

/// Output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lines written by the engine itself
    System,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Event emitted by a sandbox provider while a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line { stream: LogStream, line: String },
    Exit { code: i32 },
}

impl LogEvent {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self::Line { stream: LogStream::Stdout, line: line.into() }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self::Line { stream: LogStream::Stderr, line: line.into() }
    }
}

/// One durable line of a task's execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub seq: i64,
    pub task_id: Uuid,
    pub stream: LogStream,
    pub line: String,
    pub created_at: DateTime<Utc>,
}

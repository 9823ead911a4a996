//! Task domain model.
//!
//! Tasks are units of work dispatched onto sandboxes. Within a swarm they
//! form a DAG through `depends_on`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_DEPENDENCIES: usize = 20;
pub const MAX_TAGS: usize = 50;
pub const MAX_TAG_LEN: usize = 100;

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or capacity
    #[default]
    Pending,
    /// Assigned to a sandbox and executing
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted its retries
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a dependent task waiting on this status can never run.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            // Failed directly from pending when provisioning exhausts retries
            Self::Pending => vec![Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => vec![Self::Pending, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Failed => vec![Self::Pending], // Manual retry
            Self::Completed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Priority level for tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// A unit of work belonging to a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Owning swarm
    pub swarm_id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Free-form description, may carry `SKILL:`/`CLI:` directives
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Priority
    pub priority: TaskPriority,
    /// Sandbox executing this task, set only while running
    pub sandbox_ref: Option<Uuid>,
    /// Task IDs that must complete first
    pub depends_on: Vec<Uuid>,
    /// Task IDs this one is triggered after (ordering metadata)
    pub triggers_after: Vec<Uuid>,
    /// Output of the last successful execution
    pub result: Option<String>,
    /// Error of the last failed execution
    pub error: Option<String>,
    /// Labels
    pub tags: Vec<String>,
    /// Failed attempts charged so far
    pub retry_count: u32,
    /// Earliest time a requeued task may be dispatched again
    pub retry_after: Option<DateTime<Utc>>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When first dispatched
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task in a swarm.
    pub fn new(swarm_id: Uuid, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            sandbox_ref: None,
            depends_on: Vec::new(),
            triggers_after: Vec::new(),
            result: None,
            error: None,
            tags: Vec::new(),
            retry_count: 0,
            retry_after: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) && task_id != self.id {
            self.depends_on.push(task_id);
        }
        self
    }

    /// Add a trigger-after reference.
    pub fn with_trigger_after(mut self, task_id: Uuid) -> Self {
        if !self.triggers_after.contains(&task_id) && task_id != self.id {
            self.triggers_after.push(task_id);
        }
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Set creation time; used to control arrival order.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Check if can transition to given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to new status, keeping `sandbox_ref` and timestamps consistent.
    ///
    /// `started_at` is stamped on the first dispatch only and survives requeues.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        let now = Utc::now();
        self.status = new_status;
        self.updated_at = now;

        match new_status {
            TaskStatus::Running => {
                self.retry_after = None;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::Pending => self.sandbox_ref = None,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.sandbox_ref = None;
                self.retry_after = None;
                self.completed_at = Some(now);
            }
        }

        Ok(())
    }

    /// Whether a requeued task is still waiting out its retry delay at `now`.
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.retry_after.is_some_and(|at| at > now)
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Reset a failed task so it re-enters the normal flow.
    pub fn reset_for_retry(&mut self) -> Result<(), String> {
        if self.status != TaskStatus::Failed {
            return Err(format!(
                "Only failed tasks can be retried (status is {})",
                self.status.as_str()
            ));
        }
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.sandbox_ref = None;
        self.error = None;
        self.result = None;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Validate task fields and size limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if self.title.len() > MAX_TITLE_LEN {
            return Err(format!("Task title cannot exceed {MAX_TITLE_LEN} characters"));
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "Task description cannot exceed {MAX_DESCRIPTION_LEN} characters"
            ));
        }
        if self.depends_on.len() > MAX_DEPENDENCIES {
            return Err(format!("Task cannot have more than {MAX_DEPENDENCIES} dependencies"));
        }
        if self.depends_on.contains(&self.id) || self.triggers_after.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        if self.tags.len() > MAX_TAGS {
            return Err(format!("Task cannot have more than {MAX_TAGS} tags"));
        }
        if let Some(tag) = self.tags.iter().find(|t| t.len() > MAX_TAG_LEN) {
            return Err(format!("Tag '{tag}' exceeds {MAX_TAG_LEN} characters"));
        }
        if self.sandbox_ref.is_some() != (self.status == TaskStatus::Running) {
            return Err("Sandbox reference must be set exactly while running".to_string());
        }
        Ok(())
    }
}

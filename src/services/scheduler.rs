//! Dependency-aware selection of the next runnable task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

/// A pending task that can never run because a dependency ended badly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub task_id: Uuid,
    pub blocker_id: Uuid,
    pub blocker_status: TaskStatus,
}

/// Result of one selection pass.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub next: Option<Task>,
    pub blocked: Vec<BlockedTask>,
}

/// Pick the next task to dispatch from a swarm's pending tasks.
///
/// `dependency_status` maps every referenced dependency to its current
/// status; an id missing from the map counts as not complete.
pub fn select_next(pending: &[Task], dependency_status: &HashMap<Uuid, TaskStatus>) -> Selection {
    select_next_at(pending, dependency_status, Utc::now())
}

/// [`select_next`] as of `now`: tasks still waiting out a retry delay are
/// not runnable yet.
pub fn select_next_at(
    pending: &[Task],
    dependency_status: &HashMap<Uuid, TaskStatus>,
    now: DateTime<Utc>,
) -> Selection {
    let mut blocked = Vec::new();
    let mut next: Option<&Task> = None;

    for task in pending.iter().filter(|t| t.status == TaskStatus::Pending) {
        let mut runnable = true;
        for dep_id in &task.depends_on {
            match dependency_status.get(dep_id) {
                Some(TaskStatus::Completed) => {}
                Some(status) if status.blocks_dependents() => {
                    blocked.push(BlockedTask {
                        task_id: task.id,
                        blocker_id: *dep_id,
                        blocker_status: *status,
                    });
                    runnable = false;
                    break;
                }
                _ => runnable = false,
            }
        }

        if runnable && task.is_backing_off(now) {
            continue;
        }
        if runnable && next.is_none_or(|best| dispatch_key(task) < dispatch_key(best)) {
            next = Some(task);
        }
    }

    Selection {
        next: next.cloned(),
        blocked,
    }
}

/// Urgent first, then oldest, then lowest id.
fn dispatch_key(task: &Task) -> (Reverse<TaskPriority>, DateTime<Utc>, Uuid) {
    (Reverse(task.priority), task.created_at, task.id)
}

/// Loads a swarm's pending tasks and their dependency statuses from the store.
pub struct Scheduler<T: TaskRepository> {
    task_repo: Arc<T>,
}

impl<T: TaskRepository> Scheduler<T> {
    pub fn new(task_repo: Arc<T>) -> Self {
        Self { task_repo }
    }

    /// Select the next runnable task of `swarm_id`, ignoring ids in `skip`.
    pub async fn next_for_swarm(&self, swarm_id: Uuid, skip: &HashSet<Uuid>) -> DomainResult<Selection> {
        let pending: Vec<Task> = self
            .task_repo
            .list(TaskFilter {
                swarm_id: Some(swarm_id),
                status: Some(TaskStatus::Pending),
            })
            .await?
            .into_iter()
            .filter(|t| !skip.contains(&t.id))
            .collect();

        if pending.is_empty() {
            return Ok(Selection::default());
        }

        let mut dep_ids: Vec<Uuid> = pending.iter().flat_map(|t| t.depends_on.iter().copied()).collect();
        dep_ids.sort_unstable();
        dep_ids.dedup();

        let dependency_status: HashMap<Uuid, TaskStatus> = self
            .task_repo
            .get_many(&dep_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t.status))
            .collect();

        let selection = select_next(&pending, &dependency_status);
        for blocked in &selection.blocked {
            tracing::warn!(
                task_id = %blocked.task_id,
                blocker_id = %blocked.blocker_id,
                blocker_status = blocked.blocker_status.as_str(),
                "Task blocked by a dependency that will not complete"
            );
        }
        Ok(selection)
    }
}

use chrono::{Duration, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use swarm_dispatch::domain::errors::DomainError;
use swarm_dispatch::domain::models::{Task, TaskPriority, TaskStatus};
use swarm_dispatch::services::{select_next, DependencyResolver};

fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Low),
        Just(TaskPriority::Medium),
        Just(TaskPriority::High),
        Just(TaskPriority::Urgent),
    ]
}

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Running),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
        Just(TaskStatus::Cancelled),
    ]
}

/// A chain t0 <- t1 <- ... <- tn, each task depending on the previous one.
fn chain(swarm_id: Uuid, len: usize) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::with_capacity(len);
    for i in 0..len {
        let mut task = Task::new(swarm_id, format!("t{i}"), "");
        if let Some(prev) = tasks.last() {
            task = task.with_dependency(prev.id);
        }
        tasks.push(task);
    }
    tasks
}

proptest! {
    /// Property: closing any chain back onto an earlier task is rejected
    #[test]
    fn prop_back_edge_always_rejected(len in 2usize..15, from in 0usize..15, to in 0usize..15) {
        let swarm_id = Uuid::new_v4();
        let tasks = chain(swarm_id, len);
        // Edge from an earlier task to a later one closes a loop
        let (early, late) = (from.min(to) % len, from.max(to) % len);
        prop_assume!(early < late);

        let mut candidate = tasks[early].clone();
        candidate.depends_on.push(tasks[late].id);

        let resolver = DependencyResolver::new();
        match resolver.check_mutation(&candidate, &tasks) {
            Err(DomainError::DependencyCycle(path)) => {
                prop_assert!(path.len() >= 2);
                prop_assert_eq!(path.first(), path.last());
            }
            other => prop_assert!(false, "expected cycle error, got {:?}", other),
        }
    }

    /// Property: forward edges in a chain never trip cycle detection
    #[test]
    fn prop_forward_edges_accepted(len in 2usize..15, from in 0usize..15, to in 0usize..15) {
        let swarm_id = Uuid::new_v4();
        let tasks = chain(swarm_id, len);
        let (early, late) = (from.min(to) % len, from.max(to) % len);
        prop_assume!(early < late);

        let mut candidate = tasks[late].clone();
        if !candidate.depends_on.contains(&tasks[early].id) {
            candidate.depends_on.push(tasks[early].id);
        }

        let resolver = DependencyResolver::new();
        prop_assert!(resolver.check_mutation(&candidate, &tasks).is_ok());
        prop_assert!(resolver.detect_cycle(&tasks).is_none());
    }

    /// Property: the selected task is runnable and no runnable task beats it
    #[test]
    fn prop_selection_is_highest_priority_oldest_runnable(
        specs in prop::collection::vec((priority_strategy(), 0i64..1000, prop::option::of(status_strategy())), 1..40)
    ) {
        let swarm_id = Uuid::new_v4();
        let base = Utc::now();
        let mut pending = Vec::new();
        let mut statuses = HashMap::new();

        for (priority, age, dep_status) in specs {
            let mut task = Task::new(swarm_id, "t", "")
                .with_priority(priority)
                .with_created_at(base - Duration::seconds(age));
            if let Some(status) = dep_status {
                let dep = Uuid::new_v4();
                statuses.insert(dep, status);
                task = task.with_dependency(dep);
            }
            pending.push(task);
        }

        let runnable = |t: &Task| {
            t.depends_on.iter().all(|d| statuses.get(d) == Some(&TaskStatus::Completed))
        };
        let selection = select_next(&pending, &statuses);

        match selection.next {
            None => prop_assert!(pending.iter().all(|t| !runnable(t))),
            Some(chosen) => {
                prop_assert!(runnable(&chosen));
                for other in pending.iter().filter(|t| runnable(t)) {
                    prop_assert!(
                        other.priority < chosen.priority
                            || (other.priority == chosen.priority && other.created_at >= chosen.created_at)
                    );
                }
            }
        }

        for blocked in &selection.blocked {
            prop_assert!(blocked.blocker_status.blocks_dependents());
        }
    }
}

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;
use uuid::Uuid;

use swarm_dispatch::domain::models::{Task, TaskPriority, TaskStatus};
use swarm_dispatch::services::{select_next, DependencyResolver};

const PRIORITIES: [TaskPriority; 4] = [
    TaskPriority::Low,
    TaskPriority::Medium,
    TaskPriority::High,
    TaskPriority::Urgent,
];

/// Pending tasks where every third one waits on a still-running dependency.
fn pending_set(size: usize) -> (Vec<Task>, HashMap<Uuid, TaskStatus>) {
    let swarm_id = Uuid::new_v4();
    let base = Utc::now();
    let mut statuses = HashMap::new();

    let tasks = (0..size)
        .map(|i| {
            let mut task = Task::new(swarm_id, format!("task {i}"), "")
                .with_priority(PRIORITIES[i % PRIORITIES.len()])
                .with_created_at(base - Duration::seconds(i as i64));
            if i % 3 == 0 {
                let dep = Uuid::new_v4();
                statuses.insert(dep, TaskStatus::Running);
                task = task.with_dependency(dep);
            }
            task
        })
        .collect();
    (tasks, statuses)
}

fn bench_select_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_next");
    for size in [100, 1_000, 10_000] {
        let (tasks, statuses) = pending_set(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| select_next(black_box(&tasks), black_box(&statuses)));
        });
    }
    group.finish();
}

fn bench_cycle_check(c: &mut Criterion) {
    let swarm_id = Uuid::new_v4();
    let mut tasks: Vec<Task> = Vec::with_capacity(1_000);
    for i in 0..1_000 {
        let mut task = Task::new(swarm_id, format!("t{i}"), "");
        if let Some(prev) = tasks.last() {
            task = task.with_dependency(prev.id);
        }
        tasks.push(task);
    }
    let mut candidate = Task::new(swarm_id, "tail", "");
    candidate.depends_on = vec![tasks[999].id, tasks[500].id];
    let resolver = DependencyResolver::new();

    c.bench_function("check_mutation_chain_1000", |b| {
        b.iter(|| resolver.check_mutation(black_box(&candidate), black_box(&tasks)));
    });
}

criterion_group!(benches, bench_select_next, bench_cycle_check);
criterion_main!(benches);

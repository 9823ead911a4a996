//! Dispatch scenarios through the trigger engine and the mock provider.

mod common;

use std::time::Duration;

use swarm_dispatch::adapters::providers::{MockProvider, MockScript};
use swarm_dispatch::domain::models::{SwarmStatus, TaskPriority, TaskStatus};
use swarm_dispatch::domain::ports::SwarmRepository;
use swarm_dispatch::services::{NewTask, SwarmService};

use common::{harness, test_config};

fn slow_success() -> MockProvider {
    MockProvider::with_default_script(MockScript::success("done").with_delay(Duration::from_millis(300)))
}

#[tokio::test]
async fn urgent_task_dispatched_before_high() {
    let h = harness(slow_success(), test_config(1, 3)).await;
    let swarm = h.swarm("priorities").await;
    let b = h.task(&swarm, "B", TaskPriority::High).await;
    let a = h.task(&swarm, "A", TaskPriority::Urgent).await;

    let report = h.engine.cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![a.id]);
    assert!(report.exhausted);

    assert_eq!(h.reload(&a).await.status, TaskStatus::Running);
    assert_eq!(h.reload(&b).await.status, TaskStatus::Pending);

    h.engine.settle_all(Duration::from_secs(5)).await;
    assert_eq!(h.reload(&a).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn dependent_waits_for_dependency_to_complete() {
    let h = harness(slow_success(), test_config(2, 3)).await;
    let swarm = h.swarm("deps").await;
    let y = h.task(&swarm, "Y", TaskPriority::Low).await;

    let service = h.task_service();
    let x = service
        .create(NewTask {
            priority: TaskPriority::Urgent,
            depends_on: vec![y.id],
            ..NewTask::new(swarm.id, "X")
        })
        .await
        .unwrap();

    // Capacity 2, yet only Y is runnable
    let report = h.engine.cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![y.id]);
    assert_eq!(h.reload(&x).await.status, TaskStatus::Pending);

    // Y still running: X stays put
    let report = h.engine.cycle().await.unwrap();
    assert!(report.dispatched.is_empty());

    h.engine.settle_all(Duration::from_secs(5)).await;
    assert_eq!(h.reload(&y).await.status, TaskStatus::Completed);

    let report = h.engine.cycle().await.unwrap();
    assert_eq!(report.dispatched, vec![x.id]);
    h.engine.settle_all(Duration::from_secs(5)).await;
    assert_eq!(h.reload(&x).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn capacity_one_across_two_swarms_dispatches_one() {
    let h = harness(slow_success(), test_config(1, 3)).await;
    let first = h.swarm("first").await;
    let second = h.swarm("second").await;
    let a = h.task(&first, "in first", TaskPriority::Medium).await;
    let b = h.task(&second, "in second", TaskPriority::Medium).await;

    let report = h.engine.cycle().await.unwrap();
    assert_eq!(report.dispatched.len(), 1);
    assert!(report.exhausted);

    let statuses = [h.reload(&a).await.status, h.reload(&b).await.status];
    assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::Running).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == TaskStatus::Pending).count(), 1);
    assert_eq!(h.provider.created().await.len(), 1);

    h.engine.settle_all(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn failed_dependency_blocks_dependent_permanently() {
    let h = harness(
        MockProvider::with_default_script(MockScript::failure("nope")),
        test_config(2, 0),
    )
    .await;
    let swarm = h.swarm("blocked").await;
    let dep = h.task(&swarm, "dep", TaskPriority::Medium).await;
    let dependent = h
        .task_service()
        .create(NewTask {
            depends_on: vec![dep.id],
            ..NewTask::new(swarm.id, "dependent")
        })
        .await
        .unwrap();

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.dispatched, vec![dep.id]);
    assert_eq!(h.reload(&dep).await.status, TaskStatus::Failed);

    let report = h.engine.cycle().await.unwrap();
    assert!(report.dispatched.is_empty());
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.blocked[0].task_id, dependent.id);
    assert_eq!(report.blocked[0].blocker_status, TaskStatus::Failed);

    // Not cancelled, just held back
    assert_eq!(h.reload(&dependent).await.status, TaskStatus::Pending);
}

#[tokio::test]
async fn paused_swarm_is_skipped_until_resumed() {
    let h = harness(MockProvider::new(), test_config(2, 3)).await;
    let service = SwarmService::new(h.swarms.clone(), h.tasks.clone());
    let swarm = h.swarm("pausable").await;
    let task = h.task(&swarm, "work", TaskPriority::Medium).await;

    service.pause(swarm.id).await.unwrap();
    let report = h.engine.cycle().await.unwrap();
    assert!(report.dispatched.is_empty());
    assert_eq!(
        h.swarms.get(swarm.id).await.unwrap().unwrap().status,
        SwarmStatus::Paused
    );

    service.resume(swarm.id).await.unwrap();
    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.dispatched, vec![task.id]);
    assert_eq!(h.reload(&task).await.status, TaskStatus::Completed);
}

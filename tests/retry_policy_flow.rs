//! Retry policy driven end to end through repeated dispatch cycles.

mod common;

use std::time::Duration;

use swarm_dispatch::adapters::providers::{MockProvider, MockScript};
use swarm_dispatch::domain::models::{
    OrchestrationConfig, RetryDecision, SandboxStatus, TaskPriority, TaskStatus,
};
use swarm_dispatch::domain::ports::{ConfigRepository, SandboxRepository, TaskRepository};

use common::{harness, test_config};

#[tokio::test]
async fn three_failures_with_max_retries_two_end_failed() {
    let h = harness(
        MockProvider::with_default_script(MockScript::failure("compile error")),
        test_config(1, 2),
    )
    .await;
    let swarm = h.swarm("retries").await;
    let task = h.task(&swarm, "flaky", TaskPriority::Medium).await;

    let mut observed = vec![h.reload(&task).await.status];
    let mut decisions = Vec::new();
    for _ in 0..3 {
        let report = h.engine.cycle().await.unwrap();
        assert_eq!(report.dispatched, vec![task.id]);
        observed.push(h.reload(&task).await.status);

        let settled = h.engine.settle_all(Duration::from_secs(5)).await;
        decisions.extend(settled.into_iter().map(|s| s.decision));
        observed.push(h.reload(&task).await.status);
    }

    assert_eq!(
        observed,
        vec![
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Failed,
        ]
    );
    assert_eq!(
        decisions,
        vec![
            RetryDecision::Requeue { retry_count: 1 },
            RetryDecision::Requeue { retry_count: 2 },
            RetryDecision::Failed { retry_count: 3 },
        ]
    );

    let failed = h.reload(&task).await;
    assert_eq!(failed.retry_count, 3);
    assert!(failed.error.as_deref().unwrap_or_default().contains("compile error"));
    assert!(failed.completed_at.is_some());
    assert!(failed.sandbox_ref.is_none());

    // A failed task is never picked again
    let report = h.engine.cycle().await.unwrap();
    assert!(report.dispatched.is_empty());
}

#[tokio::test]
async fn retry_count_never_decreases_until_manual_retry() {
    let h = harness(
        MockProvider::with_default_script(MockScript::failure("boom")),
        test_config(1, 1),
    )
    .await;
    let swarm = h.swarm("monotonic").await;
    let task = h.task(&swarm, "t", TaskPriority::Medium).await;

    let mut last = 0;
    for _ in 0..2 {
        h.engine.run_once().await.unwrap();
        let count = h.reload(&task).await.retry_count;
        assert!(count >= last);
        last = count;
    }
    assert_eq!(h.reload(&task).await.status, TaskStatus::Failed);

    let retried = h.task_service().retry(task.id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 0);
    assert!(retried.error.is_none());
}

#[tokio::test]
async fn timeout_counts_as_failed_attempt() {
    let h = harness(
        MockProvider::with_default_script(MockScript::hang()),
        OrchestrationConfig {
            execution_timeout_secs: 1,
            ..test_config(1, 3)
        },
    )
    .await;
    let swarm = h.swarm("slow").await;
    let task = h.task(&swarm, "hangs", TaskPriority::Medium).await;

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].outcome, "timeout");

    let stored = h.reload(&task).await;
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error.as_deref().unwrap_or_default().contains("timed out"));

    // A timeout is not a provider fault; the sandbox goes back to idle
    let live = h.sandboxes.list(false).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, SandboxStatus::Idle);
    assert!(live[0].current_task_id.is_none());
}

#[tokio::test]
async fn broken_sandbox_is_destroyed_and_task_requeued() {
    let h = harness(
        MockProvider::with_default_script(MockScript::broken("container vanished")),
        test_config(1, 3),
    )
    .await;
    let swarm = h.swarm("broken").await;
    let task = h.task(&swarm, "victim", TaskPriority::Medium).await;

    h.engine.run_once().await.unwrap();

    let stored = h.reload(&task).await;
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(h.provider.destroyed().await.len(), 1);
}

#[tokio::test]
async fn config_edit_applies_on_next_cycle() {
    let h = harness(
        MockProvider::with_default_script(MockScript::failure("x")),
        test_config(1, 5),
    )
    .await;
    let swarm = h.swarm("hot").await;
    let task = h.task(&swarm, "t", TaskPriority::Medium).await;

    h.engine.run_once().await.unwrap();
    assert_eq!(h.reload(&task).await.status, TaskStatus::Pending);

    let mut config = h.config.get().await.unwrap();
    config.set("max_retries", "1").unwrap();
    h.config.save(&config).await.unwrap();

    h.engine.run_once().await.unwrap();
    let stored = h.reload(&task).await;
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.retry_count, 2);

    let logs = h.tasks.logs(task.id, None, 100).await.unwrap();
    assert!(!logs.is_empty());
}

#[tokio::test]
async fn requeued_task_waits_out_its_retry_delay() {
    let h = harness(
        MockProvider::with_default_script(MockScript::failure("flaky network")),
        OrchestrationConfig {
            retry_base_delay_secs: 1,
            ..test_config(1, 3)
        },
    )
    .await;
    let swarm = h.swarm("backoff").await;
    let task = h.task(&swarm, "t", TaskPriority::Medium).await;

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.dispatched, vec![task.id]);
    let requeued = h.reload(&task).await;
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.retry_after.is_some());

    // Still inside the first one-second delay
    let report = h.engine.cycle().await.unwrap();
    assert!(report.dispatched.is_empty());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.dispatched, vec![task.id]);

    // The second delay doubles to two seconds
    let requeued = h.reload(&task).await;
    assert_eq!(requeued.retry_count, 2);
    let wait = requeued.retry_after.unwrap() - requeued.updated_at;
    assert!(wait >= chrono::Duration::milliseconds(1900), "{wait}");
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(h.engine.cycle().await.unwrap().dispatched.is_empty());
}

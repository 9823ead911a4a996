//! Pool capacity, exclusivity and eviction under the running engine.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use swarm_dispatch::adapters::providers::{MockProvider, MockScript};
use swarm_dispatch::domain::models::{OrchestrationConfig, SandboxStatus, TaskPriority, TaskStatus};
use swarm_dispatch::domain::ports::{SandboxRepository, TaskFilter, TaskRepository};

use common::{eventually, harness, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_exceeds_capacity_or_shares_a_sandbox() {
    let provider =
        MockProvider::with_default_script(MockScript::success("ok").with_delay(Duration::from_millis(150)));
    let h = harness(provider, test_config(3, 3)).await;
    let swarm = h.swarm("busy").await;
    for i in 0..10 {
        h.task(&swarm, &format!("task {i}"), TaskPriority::Medium).await;
    }

    let shutdown = CancellationToken::new();
    let engine = h.engine.clone();
    let stop = shutdown.clone();
    let handle = tokio::spawn(async move { engine.run(stop).await });

    let tasks = h.tasks.clone();
    let done = eventually(Duration::from_secs(30), || {
        let tasks = tasks.clone();
        async move {
            tasks
                .list(TaskFilter {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                })
                .await
                .map(|t| t.len() == 10)
                .unwrap_or(false)
        }
    })
    .await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert!(done, "all tasks should complete");
    assert!(h.provider.max_concurrent_executions() <= 3);
    assert_eq!(h.provider.max_concurrent_per_sandbox(), 1);
    assert!(h.provider.created().await.len() <= 3);
}

#[tokio::test]
async fn idle_sandboxes_are_swept_after_timeout() {
    let h = harness(
        MockProvider::new(),
        OrchestrationConfig {
            pool_idle_timeout_secs: 1,
            ..test_config(2, 3)
        },
    )
    .await;
    let swarm = h.swarm("sweep").await;
    h.task(&swarm, "one", TaskPriority::Medium).await;

    h.engine.run_once().await.unwrap();
    let live = h.sandboxes.list(false).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, SandboxStatus::Idle);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let report = h.engine.cycle().await.unwrap();
    assert_eq!(report.swept, vec![live[0].id]);

    assert!(h.sandboxes.list(false).await.unwrap().is_empty());
    let all = h.sandboxes.list(true).await.unwrap();
    assert_eq!(all[0].status, SandboxStatus::Destroyed);
    assert_eq!(h.provider.destroyed().await, vec![live[0].provider_ref.clone()]);
}

#[tokio::test]
async fn full_pool_reports_exhausted_until_sweep_reclaims() {
    let h = harness(
        MockProvider::new(),
        OrchestrationConfig {
            pool_idle_timeout_secs: 1,
            ..test_config(1, 3)
        },
    )
    .await;
    let first = h.swarm("first").await;
    let second = h.swarm("second").await;
    h.task(&first, "a", TaskPriority::Medium).await;

    h.engine.run_once().await.unwrap();
    let before = h.sandboxes.list(false).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].swarm_id, Some(first.id));

    // The only slot is held by an idle sandbox of another swarm
    let b = h.task(&second, "b", TaskPriority::Medium).await;
    let report = h.engine.run_once().await.unwrap();
    assert!(report.dispatched.is_empty());
    assert!(report.exhausted);
    assert_eq!(h.reload(&b).await.status, TaskStatus::Pending);
    assert!(h.provider.destroyed().await.is_empty());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.swept, vec![before[0].id]);
    assert_eq!(report.dispatched, vec![b.id]);
    assert_eq!(h.reload(&b).await.status, TaskStatus::Completed);

    let after = h.sandboxes.list(false).await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].swarm_id, Some(second.id));
}

#[tokio::test]
async fn idle_sandbox_is_reused_within_a_swarm() {
    let h = harness(MockProvider::new(), test_config(2, 3)).await;
    let swarm = h.swarm("reuse").await;

    for title in ["first", "second", "third"] {
        h.task(&swarm, title, TaskPriority::Medium).await;
        h.engine.run_once().await.unwrap();
    }

    assert_eq!(h.provider.created().await.len(), 1);
    assert_eq!(h.provider.executions().await.len(), 3);
}

//! CLI command handlers run against a project in a temp directory.

use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use swarm_dispatch::cli::commands::{config, init, pool, run, swarm, task};
use swarm_dispatch::cli::context::AppContext;
use swarm_dispatch::domain::models::TaskStatus;
use swarm_dispatch::domain::ports::{TaskFilter, TaskRepository};
use swarm_dispatch::infrastructure::config::{AppConfig, ProviderKind, PROJECT_DIR};

fn project() -> (TempDir, AppConfig) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = AppConfig::default();
    config.database.path = dir
        .path()
        .join(PROJECT_DIR)
        .join("dispatch.db")
        .display()
        .to_string();
    config.provider.kind = ProviderKind::Mock;
    config.provider.work_root = dir.path().join("sandboxes");
    (dir, config)
}

async fn init_project(dir: &TempDir, config: &AppConfig) {
    let args = init::InitArgs {
        force: false,
        path: Some(dir.path().to_path_buf()),
    };
    assert_ok!(init::execute(args, config, true).await);
}

#[tokio::test]
async fn commands_require_init() {
    let (_dir, config) = project();
    let args = swarm::SwarmArgs {
        command: swarm::SwarmCommands::List { status: None },
    };
    let err = swarm::execute(args, &config, true).await.unwrap_err();
    assert!(err.to_string().contains("init"));
}

#[tokio::test]
async fn create_swarm_and_task_then_run_once() {
    let (dir, config) = project();
    init_project(&dir, &config).await;

    assert_ok!(
        swarm::execute(
            swarm::SwarmArgs {
                command: swarm::SwarmCommands::Create {
                    name: "docs".to_string(),
                    description: "Documentation".to_string(),
                    project: None,
                },
            },
            &config,
            true,
        )
        .await
    );

    assert_ok!(
        task::execute(
            task::TaskArgs {
                command: task::TaskCommands::Create {
                    swarm: "docs".to_string(),
                    title: "Write the README".to_string(),
                    description: "SKILL: writing".to_string(),
                    priority: "high".to_string(),
                    depends_on: vec![],
                    triggers_after: vec![],
                    tags: vec!["docs".to_string()],
                },
            },
            &config,
            true,
        )
        .await
    );

    // Unknown priority is rejected before anything is stored
    assert_err!(
        task::execute(
            task::TaskArgs {
                command: task::TaskCommands::Create {
                    swarm: "docs".to_string(),
                    title: "Bad".to_string(),
                    description: String::new(),
                    priority: "critical".to_string(),
                    depends_on: vec![],
                    triggers_after: vec![],
                    tags: vec![],
                },
            },
            &config,
            true,
        )
        .await
    );

    assert_ok!(run::execute(run::RunArgs { once: true }, &config, true).await);

    let ctx = AppContext::open(&config).await.unwrap();
    let tasks = ctx.task_repo.list(TaskFilter::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);

    assert_ok!(
        pool::execute(
            pool::PoolArgs {
                command: pool::PoolCommands::Status,
            },
            &config,
            true,
        )
        .await
    );
}

#[tokio::test]
async fn config_set_and_reset() {
    let (dir, config) = project();
    init_project(&dir, &config).await;

    let set = |key: &str, value: &str| config::ConfigArgs {
        command: config::ConfigCommands::Set {
            key: key.to_string(),
            value: value.to_string(),
        },
    };

    assert_ok!(config::execute(set("max_retries", "7"), &config, true).await);
    assert_err!(config::execute(set("pool_max_sandboxes", "0"), &config, true).await);
    assert_err!(config::execute(set("no_such_key", "1"), &config, true).await);

    let ctx = AppContext::open(&config).await.unwrap();
    assert_eq!(ctx.orchestration().await.unwrap().max_retries, 7);

    let reset = config::ConfigArgs {
        command: config::ConfigCommands::Reset,
    };
    assert_ok!(config::execute(reset, &config, true).await);
    assert_eq!(
        ctx.orchestration().await.unwrap().max_retries,
        config.orchestration.max_retries
    );
}

//! Task executor.
//!
//! Drives one task through one attempt on an already assigned sandbox:
//! runs the agent command, persists its output line by line, enforces the
//! execution timeout and honors cancellation. The sandbox stays busy until
//! the caller has recorded the outcome and calls [`TaskExecutor::release`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{
    ExecutionOutcome, LogEvent, LogStream, OrchestrationConfig, Sandbox, Task, TaskStatus,
};
use crate::domain::ports::{SandboxRepository, TaskRepository};
use crate::infrastructure::config::ExecutorConfig;
use crate::services::pool_manager::PoolManager;
use crate::services::prompt_builder::build_agent_command;

/// How often the stored task status is checked for an external cancel.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Bytes of stdout kept as the task result.
const MAX_RESULT_BYTES: usize = 64 * 1024;

/// Lines of output quoted in a failure message.
const ERROR_TAIL_LINES: usize = 20;

pub struct TaskExecutor<T: TaskRepository, R: SandboxRepository> {
    task_repo: Arc<T>,
    pool: Arc<PoolManager<R>>,
    settings: ExecutorConfig,
    status_poll_interval: Duration,
}

impl<T: TaskRepository, R: SandboxRepository> TaskExecutor<T, R> {
    pub fn new(task_repo: Arc<T>, pool: Arc<PoolManager<R>>, settings: ExecutorConfig) -> Self {
        Self {
            task_repo,
            pool,
            settings,
            status_poll_interval: STATUS_POLL_INTERVAL,
        }
    }

    /// Override how often the store is polled for cancellation.
    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval = interval;
        self
    }

    /// Hand the sandbox back once the outcome has been applied to the task.
    ///
    /// A fatal outcome destroys the sandbox instead.
    pub async fn release(&self, task_id: Uuid, sandbox: &Sandbox, outcome: &ExecutionOutcome) {
        if let Err(e) = self.pool.release(sandbox.id, outcome).await {
            tracing::error!(sandbox_id = %sandbox.id, task_id = %task_id, error = %e, "Failed to release sandbox");
        }
    }

    /// Run one attempt of `task` on `sandbox`.
    pub async fn execute(
        &self,
        task: &Task,
        sandbox: &Sandbox,
        config: &OrchestrationConfig,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let timeout = config.execution_timeout();
        tracing::info!(
            task_id = %task.id,
            sandbox_id = %sandbox.id,
            provider_ref = %sandbox.provider_ref,
            attempt = task.retry_count + 1,
            "Starting task execution"
        );
        self.system_log(task, &format!("Dispatched on sandbox {}", sandbox.provider_ref)).await;

        let command = build_agent_command(task, &self.settings);
        let mut events = match self.pool.provider().execute(&sandbox.provider_ref, &command).await {
            Ok(rx) => rx,
            Err(e) => {
                let error = e.to_string();
                self.system_log(task, &error).await;
                return ExecutionOutcome::Failure { error, fatal: true };
            }
        };

        let mut output = OutputBuffer::default();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut status_poll = tokio::time::interval(self.status_poll_interval);
        status_poll.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.system_log(task, "Execution cancelled").await;
                    return ExecutionOutcome::Aborted;
                }
                () = &mut deadline => {
                    let outcome = ExecutionOutcome::Timeout { after: timeout };
                    self.system_log(task, &outcome.error_message().unwrap_or_default()).await;
                    return outcome;
                }
                _ = status_poll.tick() => {
                    if self.cancelled_in_store(task).await {
                        self.system_log(task, "Execution cancelled").await;
                        return ExecutionOutcome::Aborted;
                    }
                }
                event = events.recv() => match event {
                    Some(LogEvent::Line { stream, line }) => {
                        if let Err(e) = self.task_repo.append_log(task.id, stream, &line).await {
                            tracing::warn!(task_id = %task.id, error = %e, "Failed to append task log");
                        }
                        output.push(stream, line);
                    }
                    Some(LogEvent::Exit { code: 0 }) => {
                        return ExecutionOutcome::Success { result: output.stdout() };
                    }
                    Some(LogEvent::Exit { code }) => {
                        let error = output.failure_message(code);
                        return ExecutionOutcome::Failure { error, fatal: false };
                    }
                    None => {
                        let error = "Sandbox stream ended without an exit status".to_string();
                        self.system_log(task, &error).await;
                        return ExecutionOutcome::Failure { error, fatal: true };
                    }
                },
            }
        }
    }

    async fn cancelled_in_store(&self, task: &Task) -> bool {
        match self.task_repo.get(task.id).await {
            Ok(Some(stored)) => stored.status == TaskStatus::Cancelled,
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to poll task status");
                false
            }
        }
    }

    async fn system_log(&self, task: &Task, line: &str) {
        if let Err(e) = self.task_repo.append_log(task.id, LogStream::System, line).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to append task log");
        }
    }
}

/// Output retained in memory for the result and error message.
#[derive(Default)]
struct OutputBuffer {
    stdout: VecDeque<String>,
    stdout_bytes: usize,
    stderr_tail: VecDeque<String>,
}

impl OutputBuffer {
    fn push(&mut self, stream: LogStream, line: String) {
        match stream {
            LogStream::Stdout => {
                self.stdout_bytes += line.len() + 1;
                self.stdout.push_back(line);
                while self.stdout_bytes > MAX_RESULT_BYTES && self.stdout.len() > 1 {
                    if let Some(dropped) = self.stdout.pop_front() {
                        self.stdout_bytes -= dropped.len() + 1;
                    }
                }
            }
            LogStream::Stderr | LogStream::System => {
                self.stderr_tail.push_back(line);
                if self.stderr_tail.len() > ERROR_TAIL_LINES {
                    self.stderr_tail.pop_front();
                }
            }
        }
    }

    fn stdout(&self) -> String {
        self.stdout.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    fn failure_message(&self, code: i32) -> String {
        let tail: Vec<&str> = if self.stderr_tail.is_empty() {
            let skip = self.stdout.len().saturating_sub(ERROR_TAIL_LINES);
            self.stdout.iter().skip(skip).map(String::as_str).collect()
        } else {
            self.stderr_tail.iter().map(String::as_str).collect()
        };

        if tail.is_empty() {
            format!("Agent exited with code {code}")
        } else {
            format!("Agent exited with code {code}: {}", tail.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{MockProvider, MockScript};
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteSandboxRepository, SqliteSwarmRepository, SqliteTaskRepository,
    };
    use crate::domain::models::{SandboxStatus, Swarm};
    use crate::domain::ports::{SwarmRepository, TaskTransition};
    use crate::services::pool_manager::Acquisition;

    struct Fixture {
        executor: TaskExecutor<SqliteTaskRepository, SqliteSandboxRepository>,
        tasks: Arc<SqliteTaskRepository>,
        sandboxes: Arc<SqliteSandboxRepository>,
        pool: Arc<PoolManager<SqliteSandboxRepository>>,
        provider: Arc<MockProvider>,
        swarm: Swarm,
    }

    async fn setup(script: MockScript) -> Fixture {
        let db = create_migrated_test_pool().await.unwrap();
        let tasks = Arc::new(SqliteTaskRepository::new(db.clone()));
        let sandboxes = Arc::new(SqliteSandboxRepository::new(db.clone()));
        let swarms = SqliteSwarmRepository::new(db);
        let provider = Arc::new(MockProvider::with_default_script(script));
        let pool = Arc::new(PoolManager::new(sandboxes.clone(), provider.clone()));
        let settings = ExecutorConfig {
            agent_command: vec!["agent".into()],
            passthrough_env: vec![],
            ..Default::default()
        };
        let executor = TaskExecutor::new(tasks.clone(), pool.clone(), settings)
            .with_status_poll_interval(Duration::from_millis(20));

        let swarm = Swarm::new("exec", "");
        swarms.create(&swarm).await.unwrap();
        Fixture { executor, tasks, sandboxes, pool, provider, swarm }
    }

    /// A task in `running` on a busy sandbox, as the trigger engine leaves it.
    async fn dispatched(fx: &Fixture) -> (Task, Sandbox) {
        let task = Task::new(fx.swarm.id, "unit", "SKILL: tester\nrun the suite");
        fx.tasks.create(&task).await.unwrap();
        let config = OrchestrationConfig::default();
        let Acquisition::Acquired(sandbox) = fx.pool.acquire(fx.swarm.id, "base", &config).await.unwrap() else {
            panic!("exhausted");
        };
        assert!(fx.tasks.start_on_sandbox(task.id, sandbox.id).await.unwrap());
        fx.pool.unreserve(sandbox.id).await;
        (fx.tasks.get(task.id).await.unwrap().unwrap(), sandbox)
    }

    fn config(timeout_secs: u64) -> OrchestrationConfig {
        OrchestrationConfig { execution_timeout_secs: timeout_secs, ..Default::default() }
    }

    #[tokio::test]
    async fn test_success_collects_stdout_and_releases() {
        let fx = setup(MockScript::success("all green")).await;
        let (task, sandbox) = dispatched(&fx).await;

        let outcome = fx.executor.execute(&task, &sandbox, &config(30), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Success { result: "all green".into() });

        // Held until the outcome is recorded
        let held = fx.sandboxes.get(sandbox.id).await.unwrap().unwrap();
        assert_eq!(held.status, SandboxStatus::Busy);
        assert_eq!(held.current_task_id, Some(task.id));

        fx.executor.release(task.id, &sandbox, &outcome).await;
        let released = fx.sandboxes.get(sandbox.id).await.unwrap().unwrap();
        assert_eq!(released.status, SandboxStatus::Idle);

        let logs = fx.tasks.logs(task.id, None, 100).await.unwrap();
        assert!(logs.iter().any(|l| l.stream == LogStream::Stdout && l.line == "all green"));
        assert_eq!(logs[0].stream, LogStream::System);

        let executions = fx.provider.executions().await;
        assert!(executions[0].args[0].contains("### Load Skill: tester"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let fx = setup(MockScript::failure("assertion failed")).await;
        let (task, sandbox) = dispatched(&fx).await;

        let outcome = fx.executor.execute(&task, &sandbox, &config(30), CancellationToken::new()).await;
        match outcome {
            ExecutionOutcome::Failure { error, fatal } => {
                assert!(!fatal);
                assert_eq!(error, "Agent exited with code 1: assertion failed");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let fx = setup(MockScript::hang()).await;
        let (task, sandbox) = dispatched(&fx).await;

        let outcome = fx.executor.execute(&task, &sandbox, &config(1), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Timeout { after: Duration::from_secs(1) });
        fx.executor.release(task.id, &sandbox, &outcome).await;
        let released = fx.sandboxes.get(sandbox.id).await.unwrap().unwrap();
        assert_eq!(released.status, SandboxStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_token_aborts() {
        let fx = setup(MockScript::hang()).await;
        let (task, sandbox) = dispatched(&fx).await;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = fx.executor.execute(&task, &sandbox, &config(30), token).await;
        assert_eq!(outcome, ExecutionOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_cancel_in_store_aborts() {
        let fx = setup(MockScript::hang()).await;
        let (task, sandbox) = dispatched(&fx).await;
        assert!(fx.tasks.transition(task.id, TaskTransition::Cancel).await.unwrap());

        let outcome = fx.executor.execute(&task, &sandbox, &config(30), CancellationToken::new()).await;
        assert_eq!(outcome, ExecutionOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_provider_error_destroys_sandbox() {
        let fx = setup(MockScript::broken("vm lost")).await;
        let (task, sandbox) = dispatched(&fx).await;

        let outcome = fx.executor.execute(&task, &sandbox, &config(30), CancellationToken::new()).await;
        assert!(outcome.is_fatal());
        fx.executor.release(task.id, &sandbox, &outcome).await;
        let destroyed = fx.sandboxes.get(sandbox.id).await.unwrap().unwrap();
        assert_eq!(destroyed.status, SandboxStatus::Destroyed);
    }

    #[test]
    fn test_output_buffer_keeps_tail() {
        let mut buffer = OutputBuffer::default();
        let big = "x".repeat(MAX_RESULT_BYTES / 2);
        buffer.push(LogStream::Stdout, big.clone());
        buffer.push(LogStream::Stdout, big.clone());
        buffer.push(LogStream::Stdout, "last".into());
        assert!(buffer.stdout().ends_with("last"));
        assert!(buffer.stdout().len() <= MAX_RESULT_BYTES);
        assert_eq!(buffer.failure_message(2).lines().count(), 2);
    }
}

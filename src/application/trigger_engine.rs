//! Trigger engine
//!
//! The periodic dispatch loop. Each cycle reads the orchestration config,
//! settles executions that already reported, sweeps idle sandboxes, then walks
//! active swarms handing runnable tasks to sandboxes until nothing is runnable
//! or the pool is exhausted. Executions run as independent tokio tasks and
//! report back over a completion channel, where the retry policy settles each
//! outcome before the sandbox goes back to the pool.
//!
//! ```text
//!  poll interval ──► cycle() ──► Scheduler ──► PoolManager::acquire
//!                                                   │
//!                                        start_on_sandbox (store tx)
//!                                                   │
//!                                    spawn TaskExecutor::execute
//!                                                   │
//!  completions ◄────────────── mpsc ◄───────────────┘
//!       │
//!  RetryPolicy::on_outcome ──► TaskExecutor::release
//! ```

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionOutcome, LogStream, OrchestrationConfig, RetryDecision, Sandbox, SandboxStatus,
    SwarmStatus, Task, TaskStatus,
};
use crate::domain::ports::{
    ConfigRepository, SandboxProvider, SandboxRepository, SwarmRepository, TaskFilter,
    TaskRepository, TaskTransition,
};
use crate::infrastructure::config::ExecutorConfig;
use crate::services::{
    Acquisition, BlockedTask, ExecutionRegistry, PoolManager, RetryPolicy, Scheduler, TaskExecutor,
};

/// How long shutdown waits for in-flight executions to report back.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Stopped,
    Running,
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Tasks started on a sandbox this cycle
    pub dispatched: Vec<Uuid>,
    /// Pending tasks held back by a failed or cancelled dependency
    pub blocked: Vec<BlockedTask>,
    /// Idle sandboxes destroyed by the sweep
    pub swept: Vec<Uuid>,
    /// Tasks charged a failed attempt because provisioning failed
    pub provision_failures: Vec<Uuid>,
    /// At least one swarm had runnable work but no capacity was left
    pub exhausted: bool,
    /// `trigger_enabled` was off; nothing was done
    pub disabled: bool,
    /// Executions settled by this cycle (and, for [`TriggerEngine::run_once`],
    /// the ones it waited for)
    pub outcomes: Vec<SettledOutcome>,
    #[serde(skip)]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettledOutcome {
    pub task_id: Uuid,
    pub outcome: &'static str,
    pub decision: RetryDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub healthy: bool,
    pub running: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
}

/// Sent by an execution when it finishes.
struct Completion {
    task: Task,
    sandbox: Sandbox,
    outcome: ExecutionOutcome,
    config: OrchestrationConfig,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
}

pub struct TriggerEngine<T, S, R, C>
where
    T: TaskRepository + 'static,
    S: SwarmRepository,
    R: SandboxRepository + 'static,
    C: ConfigRepository,
{
    task_repo: Arc<T>,
    swarm_repo: Arc<S>,
    sandbox_repo: Arc<R>,
    config_repo: Arc<C>,
    pool: Arc<PoolManager<R>>,
    scheduler: Scheduler<T>,
    retry_policy: RetryPolicy<T>,
    executor: Arc<TaskExecutor<T, R>>,
    registry: ExecutionRegistry,

    state: RwLock<EngineState>,
    healthy: AtomicBool,
    counters: Counters,
    shutdown_grace: Duration,

    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
    executions: Mutex<JoinSet<()>>,
}

impl<T, S, R, C> TriggerEngine<T, S, R, C>
where
    T: TaskRepository + 'static,
    S: SwarmRepository,
    R: SandboxRepository + 'static,
    C: ConfigRepository,
{
    pub fn new(
        task_repo: Arc<T>,
        swarm_repo: Arc<S>,
        sandbox_repo: Arc<R>,
        config_repo: Arc<C>,
        provider: Arc<dyn SandboxProvider>,
        settings: ExecutorConfig,
        registry: ExecutionRegistry,
    ) -> Self {
        let pool = Arc::new(PoolManager::new(sandbox_repo.clone(), provider));
        let executor = Arc::new(TaskExecutor::new(task_repo.clone(), pool.clone(), settings));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Self {
            scheduler: Scheduler::new(task_repo.clone()),
            retry_policy: RetryPolicy::new(task_repo.clone()),
            task_repo,
            swarm_repo,
            sandbox_repo,
            config_repo,
            pool,
            executor,
            registry,
            state: RwLock::new(EngineState::Stopped),
            healthy: AtomicBool::new(true),
            counters: Counters::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            completion_tx,
            completion_rx: Mutex::new(completion_rx),
            executions: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Replace the executor, e.g. to shorten its status poll in tests.
    pub fn with_executor(mut self, executor: TaskExecutor<T, R>) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn pool(&self) -> &Arc<PoolManager<R>> {
        &self.pool
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state().await,
            healthy: self.is_healthy(),
            running: self.registry.len().await,
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Requeue tasks left running by a previous process and free their sandboxes.
    ///
    /// Recovery charges no retry. Executions tracked by this process are left alone.
    pub async fn recover_orphans(&self) -> DomainResult<usize> {
        let tracked: HashSet<Uuid> = self.registry.running().await.into_iter().collect();
        let running = self
            .task_repo
            .list(TaskFilter {
                status: Some(TaskStatus::Running),
                ..Default::default()
            })
            .await?;

        let mut recovered = 0;
        for task in running.iter().filter(|t| !tracked.contains(&t.id)) {
            if self.task_repo.transition(task.id, TaskTransition::Recover).await? {
                recovered += 1;
                self.system_log(task.id, "Execution interrupted; task requeued").await;
                tracing::warn!(task_id = %task.id, "Recovered orphaned running task");
            }
        }

        let stranded: Vec<Sandbox> = self
            .sandbox_repo
            .list(false)
            .await?
            .into_iter()
            .filter(|s| {
                s.status == SandboxStatus::Busy
                    && s.current_task_id.is_none_or(|id| !tracked.contains(&id))
            })
            .collect();
        for sandbox in stranded {
            if self.sandbox_repo.release(sandbox.id).await? {
                tracing::info!(sandbox_id = %sandbox.id, "Released stranded sandbox");
            }
        }

        Ok(recovered)
    }

    /// One dispatch cycle.
    ///
    /// Returns [`DomainError::ConfigError`] when the stored config is invalid
    /// or the provider is unavailable; the engine is then marked unhealthy.
    pub async fn cycle(&self) -> DomainResult<CycleReport> {
        let config = self.config_repo.get().await?;
        let mut report = CycleReport {
            poll_interval: config.trigger_poll_interval(),
            ..Default::default()
        };
        if !config.trigger_enabled {
            report.disabled = true;
            return Ok(report);
        }

        if let Err(e) = self.check_ready(&config).await {
            self.healthy.store(false, Ordering::SeqCst);
            tracing::error!(error = %e, "Trigger engine halted");
            return Err(e);
        }
        self.healthy.store(true, Ordering::SeqCst);

        // A finished execution still owns its sandbox until it is settled
        report.outcomes = self.settle_ready().await;
        report.swept = self.pool.sweep_idle(&config).await?;

        let swarms = self.swarm_repo.list(Some(SwarmStatus::Active)).await?;
        for swarm in swarms {
            self.dispatch_swarm(swarm.id, &config, &mut report).await?;
        }

        if !report.dispatched.is_empty() {
            let running = self.registry.len().await;
            tracing::info!(
                dispatched = report.dispatched.len(),
                running = running,
                "Dispatch cycle complete"
            );
        }
        Ok(report)
    }

    async fn check_ready(&self, config: &OrchestrationConfig) -> DomainResult<()> {
        config.validate()?;

        let provider = self.pool.provider();
        match provider.is_available().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DomainError::ConfigError(format!(
                "Sandbox provider '{}' is unavailable",
                provider.name()
            ))),
            Err(e) => Err(DomainError::ConfigError(format!(
                "Sandbox provider '{}' availability check failed: {e}",
                provider.name()
            ))),
        }
    }

    /// Dispatch runnable tasks of one swarm until none is left or capacity runs out.
    async fn dispatch_swarm(
        &self,
        swarm_id: Uuid,
        config: &OrchestrationConfig,
        report: &mut CycleReport,
    ) -> DomainResult<()> {
        let mut skip = HashSet::new();
        let mut first = true;

        loop {
            let selection = self.scheduler.next_for_swarm(swarm_id, &skip).await?;
            if first {
                report.blocked.extend(selection.blocked);
                first = false;
            }
            let Some(task) = selection.next else {
                return Ok(());
            };

            let sandbox = match self.pool.acquire(swarm_id, &config.default_snapshot, config).await {
                Ok(Acquisition::Acquired(sandbox)) => sandbox,
                Ok(Acquisition::Exhausted) => {
                    tracing::debug!(swarm_id = %swarm_id, task_id = %task.id, "Pool exhausted; task stays pending");
                    report.exhausted = true;
                    return Ok(());
                }
                Err(DomainError::ProvisionFailed(error)) => {
                    let outcome = ExecutionOutcome::ProvisionFailed { error };
                    self.system_log(task.id, &outcome.error_message().unwrap_or_default()).await;
                    let decision = self.retry_policy.on_outcome(&task, &outcome, config).await?;
                    self.count(decision);
                    report.provision_failures.push(task.id);
                    // The provider is likely to fail the rest of this swarm too
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let started = self.task_repo.start_on_sandbox(task.id, sandbox.id).await;
            self.pool.unreserve(sandbox.id).await;
            match started {
                Ok(true) => {
                    report.dispatched.push(task.id);
                    self.spawn_execution(task, sandbox, config.clone()).await;
                }
                Ok(false) => {
                    tracing::debug!(task_id = %task.id, "Task changed before start; skipping");
                    skip.insert(task.id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn spawn_execution(&self, task: Task, sandbox: Sandbox, config: OrchestrationConfig) {
        let token = self.registry.register(task.id).await;
        let executor = self.executor.clone();
        let completions = self.completion_tx.clone();
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            task_id = %task.id,
            swarm_id = %task.swarm_id,
            sandbox_id = %sandbox.id,
            priority = task.priority.as_str(),
            "Task dispatched"
        );

        self.executions.lock().await.spawn(async move {
            let outcome = executor.execute(&task, &sandbox, &config, token).await;
            // The receiver lives as long as the engine
            let _ = completions.send(Completion { task, sandbox, outcome, config });
        });
    }

    /// Settle one finished execution, then free its sandbox.
    async fn settle(&self, completion: Completion) -> SettledOutcome {
        let Completion { task, sandbox, outcome, config } = completion;
        self.registry.remove(task.id).await;

        let decision = if outcome == ExecutionOutcome::Aborted {
            // Still running only when aborted by shutdown rather than a cancel
            match self.task_repo.transition(task.id, TaskTransition::Recover).await {
                Ok(true) => {
                    self.system_log(task.id, "Execution interrupted by shutdown; task requeued").await;
                    tracing::info!(task_id = %task.id, "Task requeued after shutdown");
                }
                Ok(false) => {}
                Err(e) => tracing::error!(task_id = %task.id, error = %e, "Failed to requeue aborted task"),
            }
            RetryDecision::Skipped
        } else {
            match self.retry_policy.on_outcome(&task, &outcome, &config).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to apply execution outcome");
                    RetryDecision::Skipped
                }
            }
        };
        self.count(decision);
        self.executor.release(task.id, &sandbox, &outcome).await;

        SettledOutcome {
            task_id: task.id,
            outcome: outcome.kind(),
            decision,
        }
    }

    fn count(&self, decision: RetryDecision) {
        let counter = match decision {
            RetryDecision::Completed => &self.counters.completed,
            RetryDecision::Requeue { .. } => &self.counters.requeued,
            RetryDecision::Failed { .. } => &self.counters.failed,
            RetryDecision::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Settle every completion already queued, without waiting.
    pub async fn settle_ready(&self) -> Vec<SettledOutcome> {
        let mut ready = Vec::new();
        {
            let mut rx = self.completion_rx.lock().await;
            while let Ok(completion) = rx.try_recv() {
                ready.push(completion);
            }
        }
        self.reap().await;

        let mut settled = Vec::with_capacity(ready.len());
        for completion in ready {
            settled.push(self.settle(completion).await);
        }
        settled
    }

    /// Wait until every in-flight execution has reported, settling each.
    ///
    /// Returns early with what was settled when `limit` elapses.
    pub async fn settle_all(&self, limit: Duration) -> Vec<SettledOutcome> {
        let mut settled = self.settle_ready().await;
        let deadline = tokio::time::Instant::now() + limit;

        while !self.registry.is_empty().await {
            let next = {
                let mut rx = self.completion_rx.lock().await;
                tokio::time::timeout_at(deadline, rx.recv()).await
            };
            match next {
                Ok(Some(completion)) => settled.push(self.settle(completion).await),
                Ok(None) => break,
                Err(_) => {
                    let remaining = self.registry.len().await;
                    tracing::warn!(
                        remaining = remaining,
                        "Timed out waiting for executions"
                    );
                    break;
                }
            }
        }
        self.reap().await;
        settled
    }

    /// Drop finished join handles.
    async fn reap(&self) {
        let mut executions = self.executions.lock().await;
        while let Some(joined) = executions.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Execution task panicked");
            }
        }
    }

    /// Run one cycle, then wait for what it started.
    pub async fn run_once(&self) -> DomainResult<CycleReport> {
        let mut report = self.cycle().await?;

        let limit = self
            .config_repo
            .get()
            .await?
            .execution_timeout()
            .saturating_add(self.shutdown_grace);
        report.outcomes.extend(self.settle_all(limit).await);
        Ok(report)
    }

    /// Run the loop until `shutdown` fires, `trigger_enabled` goes off, or a
    /// config error halts it.
    pub async fn run(&self, shutdown: CancellationToken) -> DomainResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Running {
                return Ok(());
            }
            *state = EngineState::Running;
        }
        tracing::info!("Trigger engine started");

        let recovered = self.recover_orphans().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Requeued tasks from a previous run");
        }

        let mut poll_interval = OrchestrationConfig::default().trigger_poll_interval();
        let result = loop {
            match self.cycle().await {
                Ok(report) if report.disabled => {
                    tracing::info!("Trigger disabled; stopping");
                    break Ok(());
                }
                Ok(report) => poll_interval = report.poll_interval,
                Err(e @ DomainError::ConfigError(_)) => break Err(e),
                Err(e) => tracing::warn!(error = %e, "Dispatch cycle failed"),
            }

            let sleep = tokio::time::sleep(poll_interval);
            tokio::pin!(sleep);
            let stop = loop {
                let next = {
                    let mut rx = self.completion_rx.lock().await;
                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => None,
                        () = &mut sleep => Some(None),
                        completion = rx.recv() => Some(completion),
                    }
                };
                match next {
                    None => break true,
                    Some(None) => break false,
                    Some(Some(completion)) => {
                        self.settle(completion).await;
                        self.reap().await;
                    }
                }
            };
            if stop {
                tracing::info!("Shutdown requested");
                break Ok(());
            }
        };

        self.shutdown_executions().await;
        *self.state.write().await = EngineState::Stopped;
        tracing::info!("Trigger engine stopped");
        result
    }

    /// Cancel in-flight executions, give them a bounded time to report, then abort.
    async fn shutdown_executions(&self) {
        let running = self.registry.len().await;
        if running > 0 {
            tracing::info!(running, "Cancelling in-flight executions");
            self.registry.cancel_all().await;
            self.settle_all(self.shutdown_grace).await;
        }

        let mut executions = self.executions.lock().await;
        if !executions.is_empty() {
            tracing::warn!(remaining = executions.len(), "Aborting executions that did not stop");
            executions.abort_all();
        }
    }

    async fn system_log(&self, task_id: Uuid, line: &str) {
        if let Err(e) = self.task_repo.append_log(task_id, LogStream::System, line).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to append task log");
        }
    }
}

//! Mock sandbox provider for testing.
//!
//! Executions follow scripts chosen by a marker string found in the command
//! arguments (typically a task title). Counters expose how many executions
//! ran at once so tests can check capacity and exclusivity.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LogEvent;
use crate::domain::ports::{SandboxCommand, SandboxProvider};

/// Scripted behavior for one execution.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Output lines, sent on stdout
    pub lines: Vec<String>,
    /// Exit status; `None` never exits
    pub exit_code: Option<i32>,
    /// Pause before the exit status is sent
    pub delay: Duration,
    /// Fail the execute call itself
    pub execute_error: Option<String>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            lines: vec!["Mock task completed successfully.".to_string()],
            exit_code: Some(0),
            delay: Duration::ZERO,
            execute_error: None,
        }
    }
}

impl MockScript {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            lines: vec![output.into()],
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            lines: vec![error.into()],
            exit_code: Some(1),
            ..Default::default()
        }
    }

    /// Produces output but never reports an exit status.
    pub fn hang() -> Self {
        Self {
            lines: vec!["working...".to_string()],
            exit_code: None,
            ..Default::default()
        }
    }

    /// The provider call fails outright; the sandbox is considered broken.
    pub fn broken(error: impl Into<String>) -> Self {
        Self {
            execute_error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct MockState {
    /// Scripts per marker, consumed front to back; the last one repeats
    scripts: HashMap<String, Vec<MockScript>>,
    created: Vec<String>,
    destroyed: Vec<String>,
    executions: Vec<SandboxCommand>,
    /// Provider refs with an execution in flight
    active_refs: HashMap<String, usize>,
}

/// Mock provider for testing.
pub struct MockProvider {
    state: Arc<RwLock<MockState>>,
    default_script: MockScript,
    create_failures: AtomicUsize,
    available: AtomicBool,
    next_ref: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    max_active_per_ref: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_default_script(MockScript::default())
    }

    pub fn with_default_script(script: MockScript) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            default_script: script,
            create_failures: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            next_ref: AtomicUsize::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            max_active_per_ref: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Scripts for commands whose arguments contain `marker`, used in order.
    pub async fn script_for(&self, marker: impl Into<String>, scripts: Vec<MockScript>) {
        let mut state = self.state.write().await;
        state.scripts.insert(marker.into(), scripts);
    }

    /// Make the next `count` create calls fail.
    pub fn fail_next_creates(&self, count: usize) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn created(&self) -> Vec<String> {
        self.state.read().await.created.clone()
    }

    pub async fn destroyed(&self) -> Vec<String> {
        self.state.read().await.destroyed.clone()
    }

    pub async fn executions(&self) -> Vec<SandboxCommand> {
        self.state.read().await.executions.clone()
    }

    /// Executions currently in flight.
    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of executions ever in flight at once.
    pub fn max_concurrent_executions(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Highest number of executions ever in flight on a single sandbox.
    pub fn max_concurrent_per_sandbox(&self) -> usize {
        self.max_active_per_ref.load(Ordering::SeqCst)
    }

    async fn next_script(&self, command: &SandboxCommand) -> MockScript {
        let mut state = self.state.write().await;
        let marker = state
            .scripts
            .keys()
            .find(|marker| command.args.iter().any(|arg| arg.contains(marker.as_str())))
            .cloned();

        match marker.and_then(|m| state.scripts.get_mut(&m)) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_else(|| self.default_script.clone()),
            None => self.default_script.clone(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counters when an execution ends or is abandoned.
struct ActiveGuard {
    provider_ref: String,
    active: Arc<AtomicUsize>,
    state: Arc<RwLock<MockState>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let state = self.state.clone();
        let provider_ref = std::mem::take(&mut self.provider_ref);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut state = state.write().await;
                if let Some(count) = state.active_refs.get_mut(&provider_ref) {
                    *count = count.saturating_sub(1);
                }
            });
        }
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> DomainResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn create(&self, snapshot: &str) -> DomainResult<String> {
        let remaining = self.create_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.create_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DomainError::ProvisionFailed(format!(
                "mock quota exceeded for snapshot {snapshot}"
            )));
        }

        let provider_ref = format!("mock-{}", self.next_ref.fetch_add(1, Ordering::SeqCst));
        self.state.write().await.created.push(provider_ref.clone());
        Ok(provider_ref)
    }

    async fn execute(
        &self,
        provider_ref: &str,
        command: &SandboxCommand,
    ) -> DomainResult<mpsc::Receiver<LogEvent>> {
        let script = self.next_script(command).await;
        {
            let mut state = self.state.write().await;
            state.executions.push(command.clone());
            if state.destroyed.iter().any(|r| r == provider_ref) {
                return Err(DomainError::ProviderError(format!(
                    "sandbox {provider_ref} was destroyed"
                )));
            }
            if let Some(error) = script.execute_error.clone() {
                return Err(DomainError::ProviderError(error));
            }

            let per_ref = state.active_refs.entry(provider_ref.to_string()).or_insert(0);
            *per_ref += 1;
            self.max_active_per_ref.fetch_max(*per_ref, Ordering::SeqCst);
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let guard = ActiveGuard {
            provider_ref: provider_ref.to_string(),
            active: self.active.clone(),
            state: self.state.clone(),
        };

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let _guard = guard;
            for line in script.lines {
                if tx.send(LogEvent::stdout(line)).await.is_err() {
                    return;
                }
            }
            match script.exit_code {
                Some(code) => {
                    if !script.delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(script.delay) => {}
                            () = tx.closed() => return,
                        }
                    }
                    let _ = tx.send(LogEvent::Exit { code }).await;
                }
                // Hold the stream open until the receiver goes away
                None => tx.closed().await,
            }
        });

        Ok(rx)
    }

    async fn destroy(&self, provider_ref: &str) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if !state.destroyed.iter().any(|r| r == provider_ref) {
            state.destroyed.push(provider_ref.to_string());
        }
        Ok(())
    }
}

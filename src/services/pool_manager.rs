//! Pool manager.
//!
//! Owns the bounded set of sandboxes. Acquisition and release are serialized
//! by an in-process lock; sandboxes handed out by `acquire` stay reserved
//! until the caller either starts a task on them or gives them back, so two
//! dispatches in the same process never receive the same idle sandbox.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionOutcome, OrchestrationConfig, Sandbox, SandboxStatus};
use crate::domain::ports::{SandboxProvider, SandboxRepository};

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// The sandbox is idle in the store and reserved for the caller
    Acquired(Sandbox),
    /// Capacity is used up; not an error
    Exhausted,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub provider: String,
    pub capacity: u32,
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    pub provisioning: usize,
    pub destroyed: usize,
    pub sandboxes: Vec<SandboxSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxSummary {
    pub id: Uuid,
    pub provider_ref: String,
    pub swarm_id: Option<Uuid>,
    pub snapshot: String,
    pub status: SandboxStatus,
    pub current_task_id: Option<Uuid>,
    pub idle_seconds: i64,
}

#[derive(Default)]
struct PoolState {
    /// Idle sandboxes handed out but not yet started
    reserved: HashSet<Uuid>,
    /// Provider create calls in flight
    provisioning: usize,
}

pub struct PoolManager<R: SandboxRepository> {
    sandbox_repo: Arc<R>,
    provider: Arc<dyn SandboxProvider>,
    state: Mutex<PoolState>,
}

impl<R: SandboxRepository> PoolManager<R> {
    pub fn new(sandbox_repo: Arc<R>, provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            sandbox_repo,
            provider,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.provider
    }

    /// Find or provision a sandbox for a task of `swarm_id`.
    ///
    /// Reuses an idle sandbox bound to the swarm (or unbound) on the same
    /// snapshot, otherwise provisions a new one while under capacity. A full
    /// pool yields [`Acquisition::Exhausted`]; idle sandboxes are only
    /// reclaimed by [`PoolManager::sweep_idle`].
    pub async fn acquire(
        &self,
        swarm_id: Uuid,
        snapshot: &str,
        config: &OrchestrationConfig,
    ) -> DomainResult<Acquisition> {
        {
            let mut state = self.state.lock().await;
            let live = self.sandbox_repo.list(false).await?;

            let reusable = live
                .iter()
                .filter(|s| !state.reserved.contains(&s.id) && s.matches(swarm_id, snapshot))
                .max_by_key(|s| (s.swarm_id.is_some(), s.last_used_at));
            if let Some(sandbox) = reusable {
                state.reserved.insert(sandbox.id);
                tracing::debug!(sandbox_id = %sandbox.id, swarm_id = %swarm_id, "Reusing idle sandbox");
                return Ok(Acquisition::Acquired(sandbox.clone()));
            }

            let capacity = usize::try_from(config.pool_max_sandboxes).unwrap_or(usize::MAX);
            if live.len() + state.provisioning >= capacity {
                return Ok(Acquisition::Exhausted);
            }
            state.provisioning += 1;
        }

        let provisioned = self.provision(swarm_id, snapshot).await;

        let mut state = self.state.lock().await;
        state.provisioning = state.provisioning.saturating_sub(1);
        let sandbox = provisioned?;
        state.reserved.insert(sandbox.id);
        Ok(Acquisition::Acquired(sandbox))
    }

    async fn provision(&self, swarm_id: Uuid, snapshot: &str) -> DomainResult<Sandbox> {
        let provider_ref = match self.provider.create(snapshot).await {
            Ok(provider_ref) => provider_ref,
            Err(DomainError::ProvisionFailed(msg)) => return Err(DomainError::ProvisionFailed(msg)),
            Err(e) => return Err(DomainError::ProvisionFailed(e.to_string())),
        };

        let sandbox = Sandbox::provisioned(provider_ref, swarm_id, snapshot);
        if let Err(e) = self.sandbox_repo.create(&sandbox).await {
            if let Err(destroy_err) = self.provider.destroy(&sandbox.provider_ref).await {
                tracing::warn!(provider_ref = %sandbox.provider_ref, error = %destroy_err, "Failed to clean up unrecorded sandbox");
            }
            return Err(e);
        }

        tracing::info!(
            sandbox_id = %sandbox.id,
            provider_ref = %sandbox.provider_ref,
            swarm_id = %swarm_id,
            snapshot,
            "Provisioned sandbox"
        );
        Ok(sandbox)
    }

    /// Drop the reservation taken by `acquire`.
    ///
    /// Called once the task has been started on the sandbox, or when the
    /// start was refused and the sandbox goes back to the idle set.
    pub async fn unreserve(&self, sandbox_id: Uuid) {
        self.state.lock().await.reserved.remove(&sandbox_id);
    }

    /// Return a sandbox to the idle set after an execution.
    ///
    /// A fatal outcome destroys the sandbox instead.
    pub async fn release(&self, sandbox_id: Uuid, outcome: &ExecutionOutcome) -> DomainResult<()> {
        if outcome.is_fatal() {
            tracing::warn!(sandbox_id = %sandbox_id, "Destroying sandbox after fatal provider error");
            self.destroy(sandbox_id).await?;
            return Ok(());
        }

        let _guard = self.state.lock().await;
        if self.sandbox_repo.release(sandbox_id).await? {
            tracing::debug!(sandbox_id = %sandbox_id, outcome = outcome.kind(), "Released sandbox");
        } else {
            tracing::debug!(sandbox_id = %sandbox_id, "Sandbox was not busy at release");
        }
        Ok(())
    }

    /// Destroy idle sandboxes unused for at least the idle timeout.
    pub async fn sweep_idle(&self, config: &OrchestrationConfig) -> DomainResult<Vec<Uuid>> {
        let timeout = chrono::Duration::from_std(config.pool_idle_timeout())
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let expired: Vec<Sandbox> = {
            let mut state = self.state.lock().await;
            let expired: Vec<Sandbox> = self
                .sandbox_repo
                .list(false)
                .await?
                .into_iter()
                .filter(|s| !state.reserved.contains(&s.id) && s.idle_expired(now, timeout))
                .collect();
            state.reserved.extend(expired.iter().map(|s| s.id));
            expired
        };

        let mut destroyed = Vec::with_capacity(expired.len());
        for sandbox in &expired {
            tracing::info!(
                sandbox_id = %sandbox.id,
                idle_seconds = sandbox.idle_seconds(now),
                "Evicting idle sandbox"
            );
            self.teardown(sandbox).await;
            destroyed.push(sandbox.id);
        }

        let mut state = self.state.lock().await;
        for id in &destroyed {
            state.reserved.remove(id);
        }
        Ok(destroyed)
    }

    /// Explicitly evict a sandbox. Returns `false` if it was already destroyed.
    pub async fn destroy(&self, sandbox_id: Uuid) -> DomainResult<bool> {
        let sandbox = self
            .sandbox_repo
            .get(sandbox_id)
            .await?
            .ok_or(DomainError::SandboxNotFound(sandbox_id))?;

        if sandbox.status == SandboxStatus::Destroyed {
            return Ok(false);
        }

        let changed = self.teardown(&sandbox).await;
        self.state.lock().await.reserved.remove(&sandbox_id);
        Ok(changed)
    }

    /// Provider destroy then store transition; provider errors are only logged.
    async fn teardown(&self, sandbox: &Sandbox) -> bool {
        if let Err(e) = self.provider.destroy(&sandbox.provider_ref).await {
            tracing::warn!(
                sandbox_id = %sandbox.id,
                provider_ref = %sandbox.provider_ref,
                error = %e,
                "Provider failed to destroy sandbox"
            );
        }
        match self.sandbox_repo.mark_destroyed(sandbox.id).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(sandbox_id = %sandbox.id, error = %e, "Failed to record sandbox destruction");
                false
            }
        }
    }

    /// Snapshot of the pool for status output.
    pub async fn status(&self, config: &OrchestrationConfig) -> DomainResult<PoolStatus> {
        let provisioning = self.state.lock().await.provisioning;
        let all = self.sandbox_repo.list(true).await?;
        let now = Utc::now();

        let count = |status: SandboxStatus| all.iter().filter(|s| s.status == status).count();
        let busy = count(SandboxStatus::Busy);
        let idle = count(SandboxStatus::Idle);
        let destroyed = count(SandboxStatus::Destroyed);

        let sandboxes = all
            .iter()
            .filter(|s| s.status.is_live())
            .map(|s| SandboxSummary {
                id: s.id,
                provider_ref: s.provider_ref.clone(),
                swarm_id: s.swarm_id,
                snapshot: s.snapshot.clone(),
                status: s.status,
                current_task_id: s.current_task_id,
                idle_seconds: s.idle_seconds(now),
            })
            .collect();

        Ok(PoolStatus {
            provider: self.provider.name().to_string(),
            capacity: config.pool_max_sandboxes,
            total: busy + idle,
            busy,
            idle,
            provisioning,
            destroyed,
            sandboxes,
        })
    }
}

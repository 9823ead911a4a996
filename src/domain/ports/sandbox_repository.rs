//! Sandbox repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Sandbox;

#[async_trait]
pub trait SandboxRepository: Send + Sync {
    async fn create(&self, sandbox: &Sandbox) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Sandbox>>;

    /// List sandboxes, oldest first. Destroyed rows are kept for inspection.
    async fn list(&self, include_destroyed: bool) -> DomainResult<Vec<Sandbox>>;

    /// busy -> idle: clear the current task and stamp `last_used_at`.
    async fn release(&self, id: Uuid) -> DomainResult<bool>;

    /// Any live status -> destroyed. Returns `false` if already destroyed.
    async fn mark_destroyed(&self, id: Uuid) -> DomainResult<bool>;
}

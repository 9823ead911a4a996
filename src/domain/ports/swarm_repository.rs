//! Swarm repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Swarm, SwarmStatus};

#[async_trait]
pub trait SwarmRepository: Send + Sync {
    async fn create(&self, swarm: &Swarm) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Swarm>>;

    /// List swarms, oldest first.
    async fn list(&self, status: Option<SwarmStatus>) -> DomainResult<Vec<Swarm>>;

    async fn update(&self, swarm: &Swarm) -> DomainResult<()>;

    /// Delete a swarm; its tasks are removed with it.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}

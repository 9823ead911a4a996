//! Orchestration config repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::OrchestrationConfig;

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Read the shared record, falling back to defaults when it was never saved.
    async fn get(&self) -> DomainResult<OrchestrationConfig>;

    /// Write the record only if none exists yet; returns the stored value.
    async fn seed(&self, config: &OrchestrationConfig) -> DomainResult<OrchestrationConfig>;

    /// Replace the record.
    async fn save(&self, config: &OrchestrationConfig) -> DomainResult<()>;
}

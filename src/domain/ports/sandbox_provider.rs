//! Sandbox provider port - interface for execution environments.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::LogEvent;

/// A command to run inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SandboxCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Trait for sandbox provider implementations.
///
/// The engine only relies on create/execute/destroy; how the provider
/// isolates work is its own concern.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provider name for logs and status output.
    fn name(&self) -> &'static str;

    /// Check that the provider is configured and reachable.
    async fn is_available(&self) -> DomainResult<bool>;

    /// Provision a sandbox from `snapshot`, returning the provider's reference.
    async fn create(&self, snapshot: &str) -> DomainResult<String>;

    /// Start `command` and stream its output.
    ///
    /// The stream ends with [`LogEvent::Exit`]. Dropping the receiver
    /// abandons the execution.
    async fn execute(
        &self,
        provider_ref: &str,
        command: &SandboxCommand,
    ) -> DomainResult<mpsc::Receiver<LogEvent>>;

    /// Tear the sandbox down.
    async fn destroy(&self, provider_ref: &str) -> DomainResult<()>;
}

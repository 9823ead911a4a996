//! In-process registry of running executions and their cancellation tokens.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared between the trigger engine, which registers executions, and the
/// task service, which cancels them.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task's execution, replacing any stale entry.
    pub async fn register(&self, task_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(stale) = self.tokens.write().await.insert(task_id, token.clone()) {
            stale.cancel();
        }
        token
    }

    pub async fn remove(&self, task_id: Uuid) {
        self.tokens.write().await.remove(&task_id);
    }

    /// Signal the execution of `task_id`. Returns `false` if none is running here.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        match self.tokens.read().await.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for token in self.tokens.read().await.values() {
            token.cancel();
        }
    }

    pub async fn running(&self) -> Vec<Uuid> {
        self.tokens.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

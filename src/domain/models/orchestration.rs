//! Orchestration settings shared by every engine component.
//!
//! One record lives in the store. The trigger engine reads it at the start of
//! each cycle and passes the value down, so edits apply on the next cycle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestrationConfig {
    /// Upper bound on idle + busy sandboxes (>= 1)
    #[serde(default = "default_pool_max_sandboxes")]
    pub pool_max_sandboxes: u32,

    /// Idle sandboxes older than this are destroyed by the sweep
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,

    /// Snapshot new sandboxes are provisioned from
    #[serde(default = "default_snapshot")]
    pub default_snapshot: String,

    /// Whether the trigger engine dispatches at all
    #[serde(default = "default_true")]
    pub trigger_enabled: bool,

    /// Seconds between cycles (>= 1)
    #[serde(default = "default_trigger_poll_interval_secs")]
    pub trigger_poll_interval_secs: u64,

    /// Per-attempt execution limit
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Failed attempts allowed before a task fails permanently
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles with every further attempt
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,

    /// Cap on the retry delay
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
}

const fn default_pool_max_sandboxes() -> u32 {
    5
}

const fn default_pool_idle_timeout_secs() -> u64 {
    600
}

fn default_snapshot() -> String {
    "swarm-lite-v1".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_trigger_poll_interval_secs() -> u64 {
    5
}

const fn default_execution_timeout_secs() -> u64 {
    600
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_delay_secs() -> u64 {
    5
}

const fn default_retry_max_delay_secs() -> u64 {
    300
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            pool_max_sandboxes: default_pool_max_sandboxes(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            default_snapshot: default_snapshot(),
            trigger_enabled: default_true(),
            trigger_poll_interval_secs: default_trigger_poll_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
        }
    }
}

impl OrchestrationConfig {
    pub const fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub const fn trigger_poll_interval(&self) -> Duration {
        Duration::from_secs(self.trigger_poll_interval_secs)
    }

    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.pool_max_sandboxes == 0 {
            return Err(DomainError::ConfigError(
                "pool_max_sandboxes must be at least 1".to_string(),
            ));
        }
        if self.trigger_poll_interval_secs == 0 {
            return Err(DomainError::ConfigError(
                "trigger_poll_interval must be at least 1 second".to_string(),
            ));
        }
        if self.execution_timeout_secs == 0 {
            return Err(DomainError::ConfigError(
                "execution_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.retry_max_delay_secs < self.retry_base_delay_secs {
            return Err(DomainError::ConfigError(
                "retry_max_delay cannot be below retry_base_delay".to_string(),
            ));
        }
        if self.default_snapshot.trim().is_empty() {
            return Err(DomainError::ConfigError(
                "default_snapshot cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a `key=value` edit, validating the result before committing it.
    pub fn set(&mut self, key: &str, value: &str) -> DomainResult<()> {
        let mut next = self.clone();
        let parse_err =
            |v: &str| DomainError::ValidationFailed(format!("Invalid value for {key}: {v}"));
        match key {
            "pool_max_sandboxes" => {
                next.pool_max_sandboxes = value.parse().map_err(|_| parse_err(value))?;
            }
            "pool_idle_timeout" | "pool_idle_timeout_secs" => {
                next.pool_idle_timeout_secs = value.parse().map_err(|_| parse_err(value))?;
            }
            "default_snapshot" => next.default_snapshot = value.to_string(),
            "trigger_enabled" => {
                next.trigger_enabled = value.parse().map_err(|_| parse_err(value))?;
            }
            "trigger_poll_interval" | "trigger_poll_interval_secs" => {
                next.trigger_poll_interval_secs = value.parse().map_err(|_| parse_err(value))?;
            }
            "execution_timeout" | "execution_timeout_secs" => {
                next.execution_timeout_secs = value.parse().map_err(|_| parse_err(value))?;
            }
            "max_retries" => next.max_retries = value.parse().map_err(|_| parse_err(value))?,
            "retry_base_delay" | "retry_base_delay_secs" => {
                next.retry_base_delay_secs = value.parse().map_err(|_| parse_err(value))?;
            }
            "retry_max_delay" | "retry_max_delay_secs" => {
                next.retry_max_delay_secs = value.parse().map_err(|_| parse_err(value))?;
            }
            other => {
                return Err(DomainError::ValidationFailed(format!(
                    "Unknown orchestration setting: {other}"
                )))
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

//! Sandbox domain model.
//!
//! A sandbox is a provider-managed execution environment. It is bound to a
//! swarm on first use and to at most one running task at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    #[default]
    Idle,
    Busy,
    Destroyed,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Destroyed => "destroyed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "destroyed" => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// Idle and busy sandboxes count against pool capacity.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Destroyed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: Uuid,
    /// Identifier assigned by the sandbox provider
    pub provider_ref: String,
    /// Swarm this sandbox is bound to, if any
    pub swarm_id: Option<Uuid>,
    /// Snapshot the sandbox was provisioned from
    pub snapshot: String,
    pub status: SandboxStatus,
    /// Task holding the sandbox, set only while busy
    pub current_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl Sandbox {
    /// A freshly provisioned idle sandbox bound to `swarm_id`.
    pub fn provisioned(
        provider_ref: impl Into<String>,
        swarm_id: Uuid,
        snapshot: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_ref: provider_ref.into(),
            swarm_id: Some(swarm_id),
            snapshot: snapshot.into(),
            status: SandboxStatus::Idle,
            current_task_id: None,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Whether this sandbox may serve a task of `swarm_id` on `snapshot`.
    ///
    /// Unbound sandboxes match any swarm; bound ones never cross swarms.
    pub fn matches(&self, swarm_id: Uuid, snapshot: &str) -> bool {
        self.status == SandboxStatus::Idle
            && self.snapshot == snapshot
            && self.swarm_id.is_none_or(|bound| bound == swarm_id)
    }

    /// Seconds since last use, zero when busy or destroyed.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        if self.status == SandboxStatus::Idle {
            (now - self.last_used_at).num_seconds().max(0)
        } else {
            0
        }
    }

    /// Idle for at least `timeout` as of `now`.
    pub fn idle_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status == SandboxStatus::Idle && now - self.last_used_at >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_matches_same_swarm_and_snapshot() {
        let swarm = Uuid::new_v4();
        let sandbox = Sandbox::provisioned("sb-1", swarm, "base");
        assert!(sandbox.matches(swarm, "base"));
        assert!(!sandbox.matches(swarm, "other"));
        assert!(!sandbox.matches(Uuid::new_v4(), "base"));
    }

    #[test]
    fn test_unbound_matches_any_swarm() {
        let mut sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        sandbox.swarm_id = None;
        assert!(sandbox.matches(Uuid::new_v4(), "base"));
    }

    #[test]
    fn test_busy_never_matches() {
        let swarm = Uuid::new_v4();
        let mut sandbox = Sandbox::provisioned("sb-1", swarm, "base");
        sandbox.status = SandboxStatus::Busy;
        sandbox.current_task_id = Some(Uuid::new_v4());
        assert!(!sandbox.matches(swarm, "base"));
        assert_eq!(sandbox.idle_seconds(Utc::now()), 0);
    }

    #[test]
    fn test_idle_seconds() {
        let mut sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        let now = Utc::now();
        sandbox.last_used_at = now - Duration::seconds(90);
        assert_eq!(sandbox.idle_seconds(now), 90);
        assert!(SandboxStatus::Idle.is_live());
        assert!(!SandboxStatus::Destroyed.is_live());
    }

    #[test]
    fn test_idle_expired_at_exact_timeout() {
        let mut sandbox = Sandbox::provisioned("sb-1", Uuid::new_v4(), "base");
        let now = Utc::now();
        sandbox.last_used_at = now - Duration::seconds(60);

        assert!(sandbox.idle_expired(now, Duration::seconds(60)));
        assert!(sandbox.idle_expired(now, Duration::seconds(59)));
        assert!(!sandbox.idle_expired(now, Duration::seconds(61)));

        sandbox.status = SandboxStatus::Busy;
        sandbox.current_task_id = Some(Uuid::new_v4());
        assert!(!sandbox.idle_expired(now, Duration::seconds(0)));
    }
}

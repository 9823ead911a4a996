//! Swarm domain model.
//!
//! A swarm groups related tasks under one pause/resume switch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    /// Pending tasks are dispatched each cycle
    #[default]
    Active,
    /// No new dispatch; running tasks are left alone
    Paused,
    /// Terminal; tasks are frozen
    Stopped,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> Vec<SwarmStatus> {
        match self {
            Self::Active => vec![Self::Paused, Self::Stopped],
            Self::Paused => vec![Self::Active, Self::Stopped],
            Self::Stopped => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A named grouping of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: SwarmStatus,
    /// Free-form reference to the project the swarm works on
    pub project_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swarm {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: SwarmStatus::default(),
            project_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_project_ref(mut self, project_ref: impl Into<String>) -> Self {
        self.project_ref = Some(project_ref.into());
        self
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == SwarmStatus::Active
    }

    /// Transition to new status.
    pub fn transition_to(&mut self, new_status: SwarmStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition swarm from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Swarm name cannot be empty".to_string());
        }
        if self.name.len() > 255 {
            return Err("Swarm name cannot exceed 255 characters".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_swarm_is_active() {
        let swarm = Swarm::new("docs", "Documentation sweep");
        assert_eq!(swarm.status, SwarmStatus::Active);
        assert!(swarm.is_dispatchable());
    }

    #[test]
    fn test_pause_resume_stop() {
        let mut swarm = Swarm::new("docs", "");
        swarm.transition_to(SwarmStatus::Paused).unwrap();
        assert!(!swarm.is_dispatchable());
        swarm.transition_to(SwarmStatus::Active).unwrap();
        swarm.transition_to(SwarmStatus::Stopped).unwrap();
        assert!(swarm.transition_to(SwarmStatus::Active).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(Swarm::new("  ", "").validate().is_err());
        assert!(Swarm::new("x".repeat(256), "").validate().is_err());
        assert!(Swarm::new("ok", "").validate().is_ok());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [SwarmStatus::Active, SwarmStatus::Paused, SwarmStatus::Stopped] {
            assert_eq!(SwarmStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(SwarmStatus::from_str("running"), None);
    }
}

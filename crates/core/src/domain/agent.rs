use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::profile::NarrativeProfileId;
use crate::domain::WorkspaceId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Draft,
    Active,
    Paused,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "ACTIVE" => Some(Self::Active),
            "PAUSED" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Lifecycle: DRAFT -> ACTIVE <-> PAUSED. No path back to DRAFT.
    pub fn can_transition(self, to: AgentStatus) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
        ) || self == to
    }
}

/// Per-agent overrides layered on top of the referenced narrative profile.
/// Effective policy is always recomputed at evaluation time; it is never
/// stored anywhere.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub allowed_topics: Vec<String>,
    #[serde(default)]
    pub blocked_topics: Vec<String>,
    #[serde(default)]
    pub allowed_personalization_fields: Vec<String>,
}

impl PolicyOverrides {
    pub fn is_empty(&self) -> bool {
        self.allowed_topics.is_empty()
            && self.blocked_topics.is_empty()
            && self.allowed_personalization_fields.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_runs_per_window: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_runs_per_window: 10, window_secs: 3_600 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub role: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub boundary: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub profile_id: Option<NarrativeProfileId>,
    pub overrides: PolicyOverrides,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn transition_status(&mut self, to: AgentStatus) -> Result<(), DomainError> {
        if !self.status.can_transition(to) {
            return Err(DomainError::InvalidAgentTransition { from: self.status, to });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::AgentStatus;

    #[test]
    fn draft_activates_but_never_pauses_directly() {
        assert!(AgentStatus::Draft.can_transition(AgentStatus::Active));
        assert!(!AgentStatus::Draft.can_transition(AgentStatus::Paused));
    }

    #[test]
    fn active_and_paused_toggle() {
        assert!(AgentStatus::Active.can_transition(AgentStatus::Paused));
        assert!(AgentStatus::Paused.can_transition(AgentStatus::Active));
        assert!(!AgentStatus::Active.can_transition(AgentStatus::Draft));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [AgentStatus::Draft, AgentStatus::Active, AgentStatus::Paused] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("retired"), None);
    }
}

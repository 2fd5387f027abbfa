use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::WorkspaceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionJobId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "DRY_RUN",
            Self::Live => "LIVE",
        }
    }

    /// Single normalization point for mode spellings. Legacy aliases
    /// (`TEST`, `SIMULATE`, `EXECUTE`) map to canonical values here and
    /// nothing downstream ever sees them.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "DRY_RUN" | "DRYRUN" | "TEST" | "SIMULATE" => Some(Self::DryRun),
            "LIVE" | "EXECUTE" => Some(Self::Live),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    CompletedWithApprovals,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::CompletedWithApprovals => "COMPLETED_WITH_APPROVALS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => Some(Self::Completed),
            "COMPLETED_WITH_APPROVALS" => Some(Self::CompletedWithApprovals),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub executed: u32,
    pub approval_required: u32,
    pub blocked: u32,
    pub failed: u32,
}

/// A job is created once per accepted execute request; the run is the
/// durable result of actually executing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: ExecutionJobId,
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub mode: ExecutionMode,
    pub sample_targets: Vec<String>,
    pub idempotency_key: Option<String>,
    pub requested_by: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: ExecutionJobId,
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub status: RunStatus,
    pub summary: String,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::ExecutionMode;

    #[test]
    fn legacy_mode_aliases_normalize_to_canonical_values() {
        assert_eq!(ExecutionMode::parse("TEST"), Some(ExecutionMode::DryRun));
        assert_eq!(ExecutionMode::parse("simulate"), Some(ExecutionMode::DryRun));
        assert_eq!(ExecutionMode::parse("dry-run"), Some(ExecutionMode::DryRun));
        assert_eq!(ExecutionMode::parse("EXECUTE"), Some(ExecutionMode::Live));
        assert_eq!(ExecutionMode::parse("live"), Some(ExecutionMode::Live));
        assert_eq!(ExecutionMode::parse("banana"), None);
    }
}

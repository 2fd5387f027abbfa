use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::execution::RunId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplainabilityEventId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExplainabilityKind {
    SelectionRationale,
    MessageRationale,
    ActionRationale,
    GuardrailTriggered,
}

impl ExplainabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectionRationale => "SELECTION_RATIONALE",
            Self::MessageRationale => "MESSAGE_RATIONALE",
            Self::ActionRationale => "ACTION_RATIONALE",
            Self::GuardrailTriggered => "GUARDRAIL_TRIGGERED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SELECTION_RATIONALE" => Some(Self::SelectionRationale),
            "MESSAGE_RATIONALE" => Some(Self::MessageRationale),
            "ACTION_RATIONALE" => Some(Self::ActionRationale),
            "GUARDRAIL_TRIGGERED" => Some(Self::GuardrailTriggered),
            _ => None,
        }
    }
}

/// Recorded rationale tied to a run, for post-hoc inspection.
/// Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainabilityEvent {
    pub id: ExplainabilityEventId,
    pub agent_id: AgentId,
    pub run_id: Option<RunId>,
    pub kind: ExplainabilityKind,
    pub summary: String,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

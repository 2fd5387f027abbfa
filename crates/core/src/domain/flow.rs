use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::WorkspaceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowDefinitionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
}

/// Versioned node/edge graph describing an agent's decision flow.
/// Follows the same append-only versioning discipline as narrative
/// profiles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowDefinitionId,
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinitionVersion {
    pub flow_id: FlowDefinitionId,
    pub version: i64,
    pub snapshot: FlowDefinition,
    pub created_at: DateTime<Utc>,
}

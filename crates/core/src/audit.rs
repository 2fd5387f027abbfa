use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::WorkspaceId;

/// Append-only record of a state-changing action. There is no update or
/// delete path anywhere in the system; the log is the durable source of
/// truth for "what happened".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub actor_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub diff_summary: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        workspace_id: WorkspaceId,
        actor_id: impl Into<String>,
        action_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        diff_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            actor_id: actor_id.into(),
            action_type: action_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            diff_summary: diff_summary.into(),
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::AuditLogEntry;
    use crate::domain::WorkspaceId;

    #[test]
    fn entry_carries_metadata_alongside_the_diff() {
        let entry = AuditLogEntry::new(
            WorkspaceId("ws-1".to_string()),
            "staff-7",
            "agent.status_changed",
            "agent",
            "agent-42",
            "ACTIVE -> PAUSED",
        )
        .with_metadata("from", "ACTIVE")
        .with_metadata("to", "PAUSED");

        assert_eq!(entry.action_type, "agent.status_changed");
        assert_eq!(entry.diff_summary, "ACTIVE -> PAUSED");
        assert_eq!(entry.metadata.get("to").map(String::as_str), Some("PAUSED"));
    }
}

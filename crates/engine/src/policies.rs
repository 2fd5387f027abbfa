//! Versioned policy documents: narrative profiles and flow
//! definitions.
//!
//! Both follow the same discipline: every write lands as a new version
//! with an immutable snapshot appended alongside, and rollback is just
//! another write whose content equals an earlier snapshot. Version
//! history never mutates.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use conductor_core::audit::AuditLogEntry;
use conductor_core::domain::flow::{FlowDefinition, FlowDefinitionId, FlowDefinitionVersion};
use conductor_core::domain::profile::{
    NarrativeProfile, NarrativeProfileId, NarrativeProfileVersion,
};
use conductor_core::errors::ApplicationError;
use conductor_db::repositories::{
    AuditLogRepository, FlowDefinitionRepository, NarrativeProfileRepository,
};

use crate::bus::{BusEvent, EventBus, EventKind};

#[derive(Clone)]
pub struct ProfileService {
    profiles: Arc<dyn NarrativeProfileRepository>,
    audit: Arc<dyn AuditLogRepository>,
    bus: EventBus,
}

impl ProfileService {
    pub fn new(
        profiles: Arc<dyn NarrativeProfileRepository>,
        audit: Arc<dyn AuditLogRepository>,
        bus: EventBus,
    ) -> Self {
        Self { profiles, audit, bus }
    }

    pub async fn create(
        &self,
        mut profile: NarrativeProfile,
        actor_id: &str,
    ) -> Result<NarrativeProfile, ApplicationError> {
        if profile.name.trim().is_empty() {
            return Err(ApplicationError::Validation("profile name must not be empty".into()));
        }
        if profile.id.0.trim().is_empty() {
            profile.id = NarrativeProfileId(Uuid::new_v4().to_string());
        }
        let now = Utc::now();
        profile.version = 1;
        profile.created_at = now;
        profile.updated_at = now;

        self.write_version(&profile, actor_id, "narrative_profile.created").await?;
        Ok(profile)
    }

    pub async fn update(
        &self,
        updated: NarrativeProfile,
        actor_id: &str,
    ) -> Result<NarrativeProfile, ApplicationError> {
        let current = self
            .profiles
            .find_by_id(&updated.id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found("narrative_profile", updated.id.0.clone()))?;

        let mut next = updated;
        next.workspace_id = current.workspace_id.clone();
        next.version = current.version + 1;
        next.created_at = current.created_at;
        next.updated_at = Utc::now();

        self.write_version(&next, actor_id, "narrative_profile.updated").await?;
        Ok(next)
    }

    /// Rolls back by writing a new version whose content equals the
    /// target snapshot. History stays intact; there is no destructive
    /// rewind.
    pub async fn rollback(
        &self,
        id: &NarrativeProfileId,
        target_version: i64,
        actor_id: &str,
    ) -> Result<NarrativeProfile, ApplicationError> {
        let current = self
            .profiles
            .find_by_id(id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found("narrative_profile", id.0.clone()))?;

        let snapshot = self
            .profiles
            .find_version(id, target_version)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| {
                ApplicationError::not_found(
                    "narrative_profile_version",
                    format!("{}@{}", id.0, target_version),
                )
            })?;

        let mut restored = snapshot.snapshot;
        restored.id = current.id.clone();
        restored.workspace_id = current.workspace_id.clone();
        restored.version = current.version + 1;
        restored.created_at = current.created_at;
        restored.updated_at = Utc::now();

        self.write_version(&restored, actor_id, "narrative_profile.rolled_back").await?;

        tracing::info!(
            event_name = "profile.rolled_back",
            profile_id = %id.0,
            target_version,
            new_version = restored.version,
            "profile rolled back"
        );
        Ok(restored)
    }

    async fn write_version(
        &self,
        profile: &NarrativeProfile,
        actor_id: &str,
        action_type: &str,
    ) -> Result<(), ApplicationError> {
        self.profiles.save(profile.clone()).await.map_err(ApplicationError::persist)?;
        self.profiles
            .append_version(NarrativeProfileVersion {
                profile_id: profile.id.clone(),
                version: profile.version,
                snapshot: profile.clone(),
                created_at: profile.updated_at,
            })
            .await
            .map_err(ApplicationError::persist)?;

        let entry = AuditLogEntry::new(
            profile.workspace_id.clone(),
            actor_id,
            action_type,
            "narrative_profile",
            profile.id.0.clone(),
            format!("version {}", profile.version),
        );
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        let kind = if profile.version == 1 { EventKind::ItemCreated } else { EventKind::ItemUpdated };
        self.bus.publish(
            BusEvent::new(
                profile.workspace_id.clone(),
                kind,
                "narrative_profile",
                profile.id.0.clone(),
            )
            .with_status(profile.version.to_string()),
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct FlowService {
    flows: Arc<dyn FlowDefinitionRepository>,
    audit: Arc<dyn AuditLogRepository>,
    bus: EventBus,
}

impl FlowService {
    pub fn new(
        flows: Arc<dyn FlowDefinitionRepository>,
        audit: Arc<dyn AuditLogRepository>,
        bus: EventBus,
    ) -> Self {
        Self { flows, audit, bus }
    }

    pub async fn create(
        &self,
        mut flow: FlowDefinition,
        actor_id: &str,
    ) -> Result<FlowDefinition, ApplicationError> {
        validate_graph(&flow)?;
        if flow.id.0.trim().is_empty() {
            flow.id = FlowDefinitionId(Uuid::new_v4().to_string());
        }
        let now = Utc::now();
        flow.version = 1;
        flow.created_at = now;
        flow.updated_at = now;

        self.write_version(&flow, actor_id, "flow_definition.created").await?;
        Ok(flow)
    }

    pub async fn update(
        &self,
        updated: FlowDefinition,
        actor_id: &str,
    ) -> Result<FlowDefinition, ApplicationError> {
        validate_graph(&updated)?;
        let current = self
            .flows
            .find_by_id(&updated.id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found("flow_definition", updated.id.0.clone()))?;

        let mut next = updated;
        next.agent_id = current.agent_id.clone();
        next.workspace_id = current.workspace_id.clone();
        next.version = current.version + 1;
        next.created_at = current.created_at;
        next.updated_at = Utc::now();

        self.write_version(&next, actor_id, "flow_definition.updated").await?;
        Ok(next)
    }

    pub async fn rollback(
        &self,
        id: &FlowDefinitionId,
        target_version: i64,
        actor_id: &str,
    ) -> Result<FlowDefinition, ApplicationError> {
        let current = self
            .flows
            .find_by_id(id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found("flow_definition", id.0.clone()))?;

        let snapshot = self
            .flows
            .find_version(id, target_version)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| {
                ApplicationError::not_found(
                    "flow_definition_version",
                    format!("{}@{}", id.0, target_version),
                )
            })?;

        let mut restored = snapshot.snapshot;
        restored.id = current.id.clone();
        restored.agent_id = current.agent_id.clone();
        restored.workspace_id = current.workspace_id.clone();
        restored.version = current.version + 1;
        restored.created_at = current.created_at;
        restored.updated_at = Utc::now();

        self.write_version(&restored, actor_id, "flow_definition.rolled_back").await?;
        Ok(restored)
    }

    async fn write_version(
        &self,
        flow: &FlowDefinition,
        actor_id: &str,
        action_type: &str,
    ) -> Result<(), ApplicationError> {
        self.flows.save(flow.clone()).await.map_err(ApplicationError::persist)?;
        self.flows
            .append_version(FlowDefinitionVersion {
                flow_id: flow.id.clone(),
                version: flow.version,
                snapshot: flow.clone(),
                created_at: flow.updated_at,
            })
            .await
            .map_err(ApplicationError::persist)?;

        let entry = AuditLogEntry::new(
            flow.workspace_id.clone(),
            actor_id,
            action_type,
            "flow_definition",
            flow.id.0.clone(),
            format!("version {}", flow.version),
        );
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        let kind = if flow.version == 1 { EventKind::ItemCreated } else { EventKind::ItemUpdated };
        self.bus.publish(
            BusEvent::new(
                flow.workspace_id.clone(),
                kind,
                "flow_definition",
                flow.id.0.clone(),
            )
            .with_status(flow.version.to_string()),
        );
        Ok(())
    }
}

/// Every edge must reference nodes that exist in the definition.
fn validate_graph(flow: &FlowDefinition) -> Result<(), ApplicationError> {
    for edge in &flow.edges {
        let known = |node_id: &str| flow.nodes.iter().any(|node| node.id == node_id);
        if !known(&edge.from) || !known(&edge.to) {
            return Err(ApplicationError::Validation(format!(
                "edge {} -> {} references an unknown node",
                edge.from, edge.to
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use conductor_core::domain::agent::AgentId;
    use conductor_core::domain::flow::{FlowDefinition, FlowDefinitionId, FlowEdge, FlowNode};
    use conductor_core::domain::profile::{NarrativeProfile, NarrativeProfileId};
    use conductor_core::domain::WorkspaceId;
    use conductor_core::errors::ApplicationError;
    use conductor_db::repositories::{
        InMemoryAuditLogRepository, InMemoryFlowDefinitionRepository,
        InMemoryNarrativeProfileRepository, NarrativeProfileRepository,
    };

    use crate::bus::EventBus;

    use super::{FlowService, ProfileService};

    fn profile_service() -> (ProfileService, Arc<InMemoryNarrativeProfileRepository>) {
        let profiles = Arc::new(InMemoryNarrativeProfileRepository::default());
        let audit = Arc::new(InMemoryAuditLogRepository::default());
        let service = ProfileService::new(profiles.clone(), audit, EventBus::default());
        (service, profiles)
    }

    fn flow_service() -> (FlowService, Arc<InMemoryFlowDefinitionRepository>) {
        let flows = Arc::new(InMemoryFlowDefinitionRepository::default());
        let audit = Arc::new(InMemoryAuditLogRepository::default());
        let service = FlowService::new(flows.clone(), audit, EventBus::default());
        (service, flows)
    }

    fn sample_profile(tone: &str) -> NarrativeProfile {
        let now = Utc::now();
        NarrativeProfile {
            id: NarrativeProfileId("np-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            name: "Default advisor voice".to_string(),
            tone: tone.to_string(),
            allowed_topics: vec![],
            blocked_topics: vec![],
            allowed_personalization_fields: vec![],
            topic_keywords: Default::default(),
            escalation_message: "Please contact your advisor.".to_string(),
            boundary: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_flow() -> FlowDefinition {
        let now = Utc::now();
        FlowDefinition {
            id: FlowDefinitionId("flow-1".to_string()),
            agent_id: AgentId("agent-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            nodes: vec![
                FlowNode {
                    id: "start".to_string(),
                    kind: "trigger".to_string(),
                    label: "New record".to_string(),
                    config: serde_json::json!({}),
                },
                FlowNode {
                    id: "send".to_string(),
                    kind: "action".to_string(),
                    label: "Send message".to_string(),
                    config: serde_json::json!({}),
                },
            ],
            edges: vec![FlowEdge {
                from: "start".to_string(),
                to: "send".to_string(),
                condition: None,
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn updates_increment_version_and_keep_history() {
        let (service, profiles) = profile_service();

        let created = service.create(sample_profile("warm"), "user-1").await.expect("create");
        assert_eq!(created.version, 1);

        let mut changed = created.clone();
        changed.tone = "direct".to_string();
        let updated = service.update(changed, "user-1").await.expect("update");
        assert_eq!(updated.version, 2);

        let versions = profiles.list_versions(&created.id).await.expect("versions");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].snapshot.tone, "warm");
        assert_eq!(versions[1].snapshot.tone, "direct");
    }

    #[tokio::test]
    async fn rollback_writes_a_new_version_equal_to_the_snapshot() {
        let (service, profiles) = profile_service();

        let created = service.create(sample_profile("warm"), "user-1").await.expect("create");
        let mut changed = created.clone();
        changed.tone = "direct".to_string();
        service.update(changed, "user-1").await.expect("update");

        let restored = service.rollback(&created.id, 1, "user-1").await.expect("rollback");
        assert_eq!(restored.version, 3);
        assert_eq!(restored.tone, "warm");

        // History is intact: three versions, none rewritten.
        let versions = profiles.list_versions(&created.id).await.expect("versions");
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[1].snapshot.tone, "direct");
    }

    #[tokio::test]
    async fn rollback_to_missing_version_is_not_found() {
        let (service, _profiles) = profile_service();

        let created = service.create(sample_profile("warm"), "user-1").await.expect("create");
        let result = service.rollback(&created.id, 7, "user-1").await;
        assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
    }

    #[tokio::test]
    async fn flow_edges_must_reference_known_nodes() {
        let (service, _flows) = flow_service();

        let mut flow = sample_flow();
        flow.edges.push(FlowEdge {
            from: "send".to_string(),
            to: "ghost".to_string(),
            condition: None,
        });

        let result = service.create(flow, "user-1").await;
        assert!(matches!(result, Err(ApplicationError::Validation(_))));
    }

    #[tokio::test]
    async fn flow_rollback_restores_graph() {
        let (service, _flows) = flow_service();

        let created = service.create(sample_flow(), "user-1").await.expect("create");

        let mut changed = created.clone();
        changed.nodes.push(FlowNode {
            id: "wait".to_string(),
            kind: "delay".to_string(),
            label: "Wait a day".to_string(),
            config: serde_json::json!({"hours": 24}),
        });
        let updated = service.update(changed, "user-1").await.expect("update");
        assert_eq!(updated.nodes.len(), 3);

        let restored = service.rollback(&created.id, 1, "user-1").await.expect("rollback");
        assert_eq!(restored.version, 3);
        assert_eq!(restored.nodes.len(), 2);
    }
}

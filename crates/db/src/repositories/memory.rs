use std::collections::HashMap;

use tokio::sync::RwLock;

use conductor_core::audit::AuditLogEntry;
use conductor_core::domain::agent::{Agent, AgentId};
use conductor_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use conductor_core::domain::compliance::{ComplianceEntry, ControlId};
use conductor_core::domain::execution::{ExecutionJob, ExecutionJobId, Run, RunId};
use conductor_core::domain::explain::ExplainabilityEvent;
use conductor_core::domain::flow::{FlowDefinition, FlowDefinitionId, FlowDefinitionVersion};
use conductor_core::domain::profile::{
    NarrativeProfile, NarrativeProfileId, NarrativeProfileVersion,
};
use conductor_core::domain::WorkspaceId;

use super::{
    AgentRepository, ApprovalRepository, AuditLogRepository, ComplianceRepository,
    ExecutionRepository, ExplainabilityRepository, FlowDefinitionRepository,
    NarrativeProfileRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        let mut matching: Vec<Agent> =
            agents.values().filter(|a| &a.workspace_id == workspace_id).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNarrativeProfileRepository {
    profiles: RwLock<HashMap<String, NarrativeProfile>>,
    versions: RwLock<HashMap<(String, i64), NarrativeProfileVersion>>,
}

#[async_trait::async_trait]
impl NarrativeProfileRepository for InMemoryNarrativeProfileRepository {
    async fn find_by_id(
        &self,
        id: &NarrativeProfileId,
    ) -> Result<Option<NarrativeProfile>, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&id.0).cloned())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<NarrativeProfile>, RepositoryError> {
        let profiles = self.profiles.read().await;
        let mut matching: Vec<NarrativeProfile> =
            profiles.values().filter(|p| &p.workspace_id == workspace_id).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn save(&self, profile: NarrativeProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.id.0.clone(), profile);
        Ok(())
    }

    async fn append_version(
        &self,
        version: NarrativeProfileVersion,
    ) -> Result<(), RepositoryError> {
        let mut versions = self.versions.write().await;
        let key = (version.profile_id.0.clone(), version.version);
        if versions.contains_key(&key) {
            return Err(RepositoryError::Decode(format!(
                "duplicate version {} for profile {}",
                version.version, version.profile_id.0
            )));
        }
        versions.insert(key, version);
        Ok(())
    }

    async fn find_version(
        &self,
        profile_id: &NarrativeProfileId,
        version: i64,
    ) -> Result<Option<NarrativeProfileVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions.get(&(profile_id.0.clone(), version)).cloned())
    }

    async fn list_versions(
        &self,
        profile_id: &NarrativeProfileId,
    ) -> Result<Vec<NarrativeProfileVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        let mut matching: Vec<NarrativeProfileVersion> = versions
            .values()
            .filter(|v| v.profile_id == *profile_id)
            .cloned()
            .collect();
        matching.sort_by_key(|v| v.version);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryFlowDefinitionRepository {
    flows: RwLock<HashMap<String, FlowDefinition>>,
    versions: RwLock<HashMap<(String, i64), FlowDefinitionVersion>>,
}

#[async_trait::async_trait]
impl FlowDefinitionRepository for InMemoryFlowDefinitionRepository {
    async fn find_by_id(
        &self,
        id: &FlowDefinitionId,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let flows = self.flows.read().await;
        Ok(flows.get(&id.0).cloned())
    }

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let flows = self.flows.read().await;
        let mut matching: Vec<FlowDefinition> =
            flows.values().filter(|f| &f.agent_id == agent_id).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn save(&self, flow: FlowDefinition) -> Result<(), RepositoryError> {
        let mut flows = self.flows.write().await;
        flows.insert(flow.id.0.clone(), flow);
        Ok(())
    }

    async fn append_version(
        &self,
        version: FlowDefinitionVersion,
    ) -> Result<(), RepositoryError> {
        let mut versions = self.versions.write().await;
        let key = (version.flow_id.0.clone(), version.version);
        if versions.contains_key(&key) {
            return Err(RepositoryError::Decode(format!(
                "duplicate version {} for flow {}",
                version.version, version.flow_id.0
            )));
        }
        versions.insert(key, version);
        Ok(())
    }

    async fn find_version(
        &self,
        flow_id: &FlowDefinitionId,
        version: i64,
    ) -> Result<Option<FlowDefinitionVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions.get(&(flow_id.0.clone(), version)).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    jobs: RwLock<HashMap<String, ExecutionJob>>,
    runs: RwLock<HashMap<String, Run>>,
}

#[async_trait::async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save_job(&self, job: ExecutionJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.0.clone(), job);
        Ok(())
    }

    async fn find_job_by_id(
        &self,
        id: &ExecutionJobId,
    ) -> Result<Option<ExecutionJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id.0).cloned())
    }

    async fn save_run(&self, run: Run) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id.0.clone(), run);
        Ok(())
    }

    async fn find_run_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&id.0).cloned())
    }

    async fn find_run_by_job_id(
        &self,
        job_id: &ExecutionJobId,
    ) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.values().find(|r| &r.job_id == job_id).cloned())
    }

    async fn list_runs_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> =
            runs.values().filter(|r| &r.agent_id == agent_id).cloned().collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        status: Option<ApprovalStatus>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matching: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|a| &a.workspace_id == workspace_id)
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLogRepository {
    pub async fn snapshot(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<AuditLogEntry> =
            entries.iter().filter(|e| &e.workspace_id == workspace_id).cloned().collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryComplianceRepository {
    entries: RwLock<HashMap<(String, String, ControlId), ComplianceEntry>>,
}

#[async_trait::async_trait]
impl ComplianceRepository for InMemoryComplianceRepository {
    async fn upsert(&self, entry: ComplianceEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        let key = (entry.entity_type.clone(), entry.entity_id.clone(), entry.control_id);
        entries.insert(key, entry);
        Ok(())
    }

    async fn find(
        &self,
        entity_type: &str,
        entity_id: &str,
        control_id: ControlId,
    ) -> Result<Option<ComplianceEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(entity_type.to_string(), entity_id.to_string(), control_id)).cloned())
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ComplianceEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<ComplianceEntry> = entries
            .values()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.control_id.as_str());
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryExplainabilityRepository {
    events: RwLock<Vec<ExplainabilityEvent>>,
}

#[async_trait::async_trait]
impl ExplainabilityRepository for InMemoryExplainabilityRepository {
    async fn append(&self, event: ExplainabilityEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn list_by_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ExplainabilityEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| e.run_id.as_ref() == Some(run_id)).cloned().collect())
    }

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<ExplainabilityEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<ExplainabilityEvent> =
            events.iter().filter(|e| &e.agent_id == agent_id).cloned().collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

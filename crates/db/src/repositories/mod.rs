use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

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

pub mod agent;
pub mod approval;
pub mod audit;
pub mod compliance;
pub mod execution;
pub mod explain;
pub mod flow;
pub mod memory;
pub mod profile;

pub use agent::SqlAgentRepository;
pub use approval::SqlApprovalRepository;
pub use audit::SqlAuditLogRepository;
pub use compliance::SqlComplianceRepository;
pub use execution::SqlExecutionRepository;
pub use explain::SqlExplainabilityRepository;
pub use flow::SqlFlowDefinitionRepository;
pub use memory::{
    InMemoryAgentRepository, InMemoryApprovalRepository, InMemoryAuditLogRepository,
    InMemoryComplianceRepository, InMemoryExecutionRepository, InMemoryExplainabilityRepository,
    InMemoryFlowDefinitionRepository, InMemoryNarrativeProfileRepository,
};
pub use profile::SqlNarrativeProfileRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

pub(crate) fn decode_error(err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(err.to_string())
}

pub(crate) fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_datetime_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Agent>, RepositoryError>;

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NarrativeProfileRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &NarrativeProfileId,
    ) -> Result<Option<NarrativeProfile>, RepositoryError>;

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<NarrativeProfile>, RepositoryError>;

    async fn save(&self, profile: NarrativeProfile) -> Result<(), RepositoryError>;

    async fn append_version(
        &self,
        version: NarrativeProfileVersion,
    ) -> Result<(), RepositoryError>;

    async fn find_version(
        &self,
        profile_id: &NarrativeProfileId,
        version: i64,
    ) -> Result<Option<NarrativeProfileVersion>, RepositoryError>;

    async fn list_versions(
        &self,
        profile_id: &NarrativeProfileId,
    ) -> Result<Vec<NarrativeProfileVersion>, RepositoryError>;
}

#[async_trait]
pub trait FlowDefinitionRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &FlowDefinitionId,
    ) -> Result<Option<FlowDefinition>, RepositoryError>;

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<FlowDefinition>, RepositoryError>;

    async fn save(&self, flow: FlowDefinition) -> Result<(), RepositoryError>;

    async fn append_version(&self, version: FlowDefinitionVersion)
        -> Result<(), RepositoryError>;

    async fn find_version(
        &self,
        flow_id: &FlowDefinitionId,
        version: i64,
    ) -> Result<Option<FlowDefinitionVersion>, RepositoryError>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save_job(&self, job: ExecutionJob) -> Result<(), RepositoryError>;

    async fn find_job_by_id(
        &self,
        id: &ExecutionJobId,
    ) -> Result<Option<ExecutionJob>, RepositoryError>;

    async fn save_run(&self, run: Run) -> Result<(), RepositoryError>;

    async fn find_run_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError>;

    /// The run produced by one accepted job; a job has at most one run.
    async fn find_run_by_job_id(
        &self,
        job_id: &ExecutionJobId,
    ) -> Result<Option<Run>, RepositoryError>;

    async fn list_runs_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError>;

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        status: Option<ApprovalStatus>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), RepositoryError>;

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait ComplianceRepository: Send + Sync {
    async fn upsert(&self, entry: ComplianceEntry) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        entity_type: &str,
        entity_id: &str,
        control_id: ControlId,
    ) -> Result<Option<ComplianceEntry>, RepositoryError>;

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ComplianceEntry>, RepositoryError>;
}

#[async_trait]
pub trait ExplainabilityRepository: Send + Sync {
    async fn append(&self, event: ExplainabilityEvent) -> Result<(), RepositoryError>;

    async fn list_by_run(&self, run_id: &RunId)
        -> Result<Vec<ExplainabilityEvent>, RepositoryError>;

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<ExplainabilityEvent>, RepositoryError>;
}

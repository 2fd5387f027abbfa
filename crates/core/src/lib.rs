pub mod audit;
pub mod boundary;
pub mod config;
pub mod domain;
pub mod errors;
pub mod guardrail;
pub mod redaction;

pub use audit::AuditLogEntry;
pub use boundary::{can_access_with_boundary, connector_allowed_for_boundary, BoundaryClaims};
pub use domain::agent::{Agent, AgentId, AgentStatus, PolicyOverrides, RateLimitConfig};
pub use domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
pub use domain::compliance::{ComplianceEntry, ComplianceStatus, ControlId};
pub use domain::execution::{
    ExecutionJob, ExecutionJobId, ExecutionMode, Run, RunCounts, RunId, RunStatus,
};
pub use domain::explain::{ExplainabilityEvent, ExplainabilityEventId, ExplainabilityKind};
pub use domain::flow::{FlowDefinition, FlowDefinitionId, FlowDefinitionVersion, FlowEdge, FlowNode};
pub use domain::profile::{NarrativeProfile, NarrativeProfileId, NarrativeProfileVersion};
pub use domain::WorkspaceId;
pub use errors::{ApplicationError, DomainError};
pub use guardrail::{
    resolve_effective_policy, run_eval_cases, EffectivePolicy, EvalCase, EvalCaseResult,
    GuardrailEvaluation, GuardrailOutcome,
};
pub use redaction::{redact_payload_preview, redact_text};

//! Execution orchestrator.
//!
//! Accepts execute requests for an agent, applies the admission
//! controls (boundary, lifecycle, idempotency, rate, concurrency),
//! persists the accepted job, then runs it: plan one action per
//! target, score it against the agent's effective policy, and either
//! execute, hold for approval, or record the block. A single target
//! failing never aborts its siblings.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use conductor_core::audit::AuditLogEntry;
use conductor_core::boundary::{
    can_access_with_boundary, connector_allowed_for_boundary, BoundaryClaims,
};
use conductor_core::config::{ConnectorConfig, ExecutionConfig};
use conductor_core::domain::agent::{Agent, AgentId, AgentStatus};
use conductor_core::domain::execution::{
    ExecutionJob, ExecutionJobId, ExecutionMode, Run, RunCounts, RunId, RunStatus,
};
use conductor_core::domain::explain::{
    ExplainabilityEvent, ExplainabilityEventId, ExplainabilityKind,
};
use conductor_core::domain::compliance::{ComplianceEntry, ComplianceStatus, ControlId};
use conductor_core::errors::ApplicationError;
use conductor_core::guardrail::{resolve_effective_policy, EffectivePolicy, GuardrailOutcome};
use conductor_db::repositories::{
    AgentRepository, AuditLogRepository, ComplianceRepository, ExecutionRepository,
    ExplainabilityRepository, NarrativeProfileRepository,
};

use crate::approvals::ApprovalGate;
use crate::bus::{BusEvent, EventBus, EventKind};
use crate::executor::{ActionExecutor, PlannedAction};
use crate::limits::{ExecutionControls, RateDecision};

const DEFAULT_ESCALATION_MESSAGE: &str =
    "This message needs staff review before the agent can proceed.";

#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub mode: ExecutionMode,
    pub sample_targets: Vec<String>,
    pub idempotency_key: Option<String>,
    pub requested_by: String,
}

#[derive(Clone, Debug)]
pub enum ExecuteOutcome {
    Accepted { job: ExecutionJob, run: Run },
    /// The idempotency key was seen inside the dedup window; the
    /// original job stands and no new work was started. The run is
    /// `None` only while the original job is still in flight.
    Deduplicated { job_id: ExecutionJobId, run: Option<Run> },
}

#[derive(Clone)]
pub struct Orchestrator {
    agents: Arc<dyn AgentRepository>,
    profiles: Arc<dyn NarrativeProfileRepository>,
    executions: Arc<dyn ExecutionRepository>,
    explainability: Arc<dyn ExplainabilityRepository>,
    compliance: Arc<dyn ComplianceRepository>,
    audit: Arc<dyn AuditLogRepository>,
    gate: ApprovalGate,
    controls: ExecutionControls,
    executor: Arc<dyn ActionExecutor>,
    bus: EventBus,
    config: ExecutionConfig,
    connectors: ConnectorConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        profiles: Arc<dyn NarrativeProfileRepository>,
        executions: Arc<dyn ExecutionRepository>,
        explainability: Arc<dyn ExplainabilityRepository>,
        compliance: Arc<dyn ComplianceRepository>,
        audit: Arc<dyn AuditLogRepository>,
        gate: ApprovalGate,
        controls: ExecutionControls,
        executor: Arc<dyn ActionExecutor>,
        bus: EventBus,
        config: ExecutionConfig,
        connectors: ConnectorConfig,
    ) -> Self {
        Self {
            agents,
            profiles,
            executions,
            explainability,
            compliance,
            audit,
            gate,
            controls,
            executor,
            bus,
            config,
            connectors,
        }
    }

    pub async fn execute(
        &self,
        agent_id: &AgentId,
        claims: &BoundaryClaims,
        request: ExecuteRequest,
    ) -> Result<ExecuteOutcome, ApplicationError> {
        let agent = self
            .agents
            .find_by_id(agent_id)
            .await
            .map_err(ApplicationError::persist)?
            // Agents in other workspaces read as absent, not forbidden.
            .filter(|agent| agent.workspace_id == claims.workspace_id)
            .ok_or_else(|| ApplicationError::not_found("agent", agent_id.0.clone()))?;

        if !can_access_with_boundary(claims, agent.boundary.as_deref()) {
            let entry = AuditLogEntry::new(
                agent.workspace_id.clone(),
                claims.actor_id.clone(),
                "boundary.denied",
                "agent",
                agent.id.0.clone(),
                format!("caller lacks scope for boundary {:?}", agent.boundary),
            );
            self.audit.append(entry).await.map_err(ApplicationError::persist)?;
            return Err(ApplicationError::BoundaryDenied(format!(
                "agent {} is outside the caller's boundary",
                agent.id.0
            )));
        }

        if agent.status != AgentStatus::Active {
            return Err(ApplicationError::Validation(format!(
                "agent must be ACTIVE to execute, current status is {}",
                agent.status.as_str()
            )));
        }

        let now = Utc::now();

        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        if let Some(key) = &idempotency_key {
            if let Some(job_id) = self.controls.check_idempotency(
                &agent.id,
                key,
                self.config.dedup_window_secs,
                now,
            ) {
                tracing::info!(
                    event_name = "execution.deduplicated",
                    agent_id = %agent.id.0,
                    job_id = %job_id,
                    "duplicate execute request inside dedup window"
                );
                let job_id = ExecutionJobId(job_id);
                let run = self
                    .executions
                    .find_run_by_job_id(&job_id)
                    .await
                    .map_err(ApplicationError::persist)?;
                return Ok(ExecuteOutcome::Deduplicated { job_id, run });
            }
        }

        // Claim the in-flight slot before spending a rate token so a
        // conflicted request does not burn the caller's budget.
        let slot = self
            .controls
            .try_acquire_in_flight(&agent.id)
            .ok_or_else(|| ApplicationError::ConcurrencyConflict(agent.id.0.clone()))?;

        let (max_runs, window_secs) = if agent.rate_limit.window_secs == 0 {
            (self.config.default_max_runs_per_window, self.config.default_window_secs)
        } else {
            (agent.rate_limit.max_runs_per_window, agent.rate_limit.window_secs)
        };
        if let RateDecision::Limited { retry_after_secs } =
            self.controls.check_rate(&agent.id, max_runs, window_secs, now)
        {
            return Err(ApplicationError::RateLimited { retry_after_secs });
        }

        let job = ExecutionJob {
            id: ExecutionJobId(Uuid::new_v4().to_string()),
            agent_id: agent.id.clone(),
            workspace_id: agent.workspace_id.clone(),
            mode: request.mode,
            sample_targets: request.sample_targets,
            idempotency_key: idempotency_key.clone(),
            requested_by: request.requested_by.clone(),
            accepted_at: now,
        };
        // The slot must outlive the run so no second request for this
        // agent is admitted while targets are being processed.
        let run = self
            .accept_and_run(&agent, &job, claims, idempotency_key.as_deref(), now)
            .await;
        drop(slot);
        match run {
            Ok(run) => Ok(ExecuteOutcome::Accepted { job, run }),
            Err(error) => {
                self.record_execution_failure(&job, &error).await;
                Err(error)
            }
        }
    }

    async fn accept_and_run(
        &self,
        agent: &Agent,
        job: &ExecutionJob,
        claims: &BoundaryClaims,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Run, ApplicationError> {
        self.executions.save_job(job.clone()).await.map_err(ApplicationError::persist)?;

        if let Some(key) = idempotency_key {
            self.controls.record_idempotency(&agent.id, key, &job.id.0, now);
        }

        let entry = AuditLogEntry::new(
            job.workspace_id.clone(),
            job.requested_by.clone(),
            "execution.accepted",
            "execution_job",
            job.id.0.clone(),
            format!("mode {} with {} targets", job.mode.as_str(), job.sample_targets.len()),
        )
        .with_metadata("agent_id", agent.id.0.clone())
        .with_metadata("payload_fingerprint", job_fingerprint(job));
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        self.run_job(agent, job, claims).await
    }

    /// Best-effort trail entry for a job that failed after admission;
    /// a second audit failure is logged, not surfaced.
    async fn record_execution_failure(&self, job: &ExecutionJob, error: &ApplicationError) {
        let entry = AuditLogEntry::new(
            job.workspace_id.clone(),
            job.requested_by.clone(),
            "execution.failed",
            "execution_job",
            job.id.0.clone(),
            format!("execution aborted: {error}"),
        )
        .with_metadata("reason", error.reason());
        if let Err(append_error) = self.audit.append(entry).await {
            tracing::error!(
                event_name = "audit.append_failed",
                job_id = %job.id.0,
                error = %append_error,
                "could not record the execution failure"
            );
        }
    }

    async fn run_job(
        &self,
        agent: &Agent,
        job: &ExecutionJob,
        claims: &BoundaryClaims,
    ) -> Result<Run, ApplicationError> {
        let run_id = RunId(Uuid::new_v4().to_string());
        let started_at = Utc::now();
        let policy = self.effective_policy(agent).await?;

        let mut counts = RunCounts::default();
        for target in &job.sample_targets {
            let action = self.executor.plan(agent, target);
            let evaluation = policy.evaluate(&action.preview);

            if evaluation.outcome == GuardrailOutcome::Fail {
                counts.approval_required += 1;
                if evaluation.blocked_topic_detected {
                    counts.blocked += 1;
                }

                self.gate
                    .create(
                        job.workspace_id.clone(),
                        agent.id.clone(),
                        action.action_type.clone(),
                        &action.preview,
                        Some(run_id.clone()),
                        format!("agent:{}", agent.id.0),
                    )
                    .await?;

                let event = ExplainabilityEvent {
                    id: ExplainabilityEventId(Uuid::new_v4().to_string()),
                    agent_id: agent.id.clone(),
                    run_id: Some(run_id.clone()),
                    kind: ExplainabilityKind::GuardrailTriggered,
                    summary: evaluation
                        .remediation
                        .clone()
                        .unwrap_or_else(|| "guardrail checks failed".to_string()),
                    details: serde_json::json!({
                        "target": target,
                        "topics_detected": evaluation.topics_detected,
                        "placeholders_detected": evaluation.placeholders_detected,
                        "blocked_topic_detected": evaluation.blocked_topic_detected,
                        "escalation_message": policy.escalation_message,
                    }),
                    occurred_at: Utc::now(),
                };
                self.explainability.append(event).await.map_err(ApplicationError::persist)?;
                continue;
            }

            match job.mode {
                ExecutionMode::DryRun => {
                    counts.executed += 1;
                }
                ExecutionMode::Live if !self.connector_allowed(&action, agent, claims) => {
                    counts.failed += 1;
                    let endpoint = action.endpoint.as_deref().unwrap_or_default();
                    let entry = AuditLogEntry::new(
                        job.workspace_id.clone(),
                        claims.actor_id.clone(),
                        "boundary.denied",
                        "connector",
                        endpoint.to_string(),
                        format!("endpoint {endpoint} is not on the connector allowlist"),
                    )
                    .with_metadata("agent_id", agent.id.0.clone())
                    .with_metadata("target", target.clone());
                    self.audit.append(entry).await.map_err(ApplicationError::persist)?;
                    tracing::warn!(
                        event_name = "connector.denied",
                        agent_id = %agent.id.0,
                        run_id = %run_id.0,
                        target = %target,
                        endpoint = %endpoint,
                        "connector endpoint outside the allowlist, target not delivered"
                    );
                }
                ExecutionMode::Live => match self.executor.execute(agent, &action).await {
                    Ok(()) => counts.executed += 1,
                    Err(error) => {
                        counts.failed += 1;
                        tracing::warn!(
                            event_name = "execution.target_failed",
                            agent_id = %agent.id.0,
                            run_id = %run_id.0,
                            target = %target,
                            error = %error,
                            "target execution failed, continuing with remaining targets"
                        );
                    }
                },
            }
        }

        // Target failures are reported through the counts; the run
        // itself still completes.
        let status = if counts.approval_required > 0 {
            RunStatus::CompletedWithApprovals
        } else {
            RunStatus::Completed
        };

        let summary = if job.sample_targets.is_empty() {
            "no targets in scope".to_string()
        } else {
            format!(
                "{} executed, {} held for approval, {} blocked, {} failed",
                counts.executed, counts.approval_required, counts.blocked, counts.failed
            )
        };

        let run = Run {
            id: run_id,
            job_id: job.id.clone(),
            agent_id: agent.id.clone(),
            workspace_id: job.workspace_id.clone(),
            status,
            summary: summary.clone(),
            counts,
            started_at,
            finished_at: Some(Utc::now()),
        };
        self.executions.save_run(run.clone()).await.map_err(ApplicationError::persist)?;

        let entry = AuditLogEntry::new(
            run.workspace_id.clone(),
            job.requested_by.clone(),
            "run.completed",
            "run",
            run.id.0.clone(),
            summary,
        )
        .with_metadata("status", run.status.as_str())
        .with_metadata("mode", job.mode.as_str());
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        self.compliance
            .upsert(ComplianceEntry {
                entity_type: "agent".to_string(),
                entity_id: agent.id.0.clone(),
                control_id: ControlId::AuditTrailEnabled,
                status: ComplianceStatus::Pass,
                evidence_link: None,
                updated_at: Utc::now(),
            })
            .await
            .map_err(ApplicationError::persist)?;

        self.bus.publish(
            BusEvent::new(run.workspace_id.clone(), EventKind::RunUpdated, "run", run.id.0.clone())
                .with_status(run.status.as_str()),
        );

        tracing::info!(
            event_name = "run.completed",
            agent_id = %agent.id.0,
            run_id = %run.id.0,
            status = run.status.as_str(),
            executed = run.counts.executed,
            approval_required = run.counts.approval_required,
            blocked = run.counts.blocked,
            failed = run.counts.failed,
            "run finished"
        );

        Ok(run)
    }

    /// An action without an endpoint stays in-platform and needs no
    /// connector clearance.
    fn connector_allowed(
        &self,
        action: &PlannedAction,
        agent: &Agent,
        claims: &BoundaryClaims,
    ) -> bool {
        match &action.endpoint {
            None => true,
            Some(endpoint) => connector_allowed_for_boundary(
                endpoint,
                agent.boundary.as_deref(),
                claims,
                &self.connectors.allowed_endpoints,
            ),
        }
    }

    /// Policy comes from the referenced profile merged with agent
    /// overrides; an agent without a profile evaluates against its
    /// overrides alone.
    async fn effective_policy(&self, agent: &Agent) -> Result<EffectivePolicy, ApplicationError> {
        let profile = match &agent.profile_id {
            Some(profile_id) => self
                .profiles
                .find_by_id(profile_id)
                .await
                .map_err(ApplicationError::persist)?,
            None => None,
        };

        Ok(match profile {
            Some(profile) => resolve_effective_policy(&profile, &agent.overrides),
            None => EffectivePolicy {
                allowed_topics: agent.overrides.allowed_topics.clone(),
                blocked_topics: agent.overrides.blocked_topics.clone(),
                allowed_personalization_fields: agent
                    .overrides
                    .allowed_personalization_fields
                    .clone(),
                topic_keywords: BTreeMap::new(),
                escalation_message: DEFAULT_ESCALATION_MESSAGE.to_string(),
            },
        })
    }
}

fn job_fingerprint(job: &ExecutionJob) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job.mode.as_str().as_bytes());
    for target in &job.sample_targets {
        hasher.update(b"\x1f");
        hasher.update(target.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

//! Agent lifecycle and execution endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use conductor_core::audit::AuditLogEntry;
use conductor_core::boundary::{can_access_with_boundary, BoundaryClaims};
use conductor_core::domain::agent::{Agent, AgentId, AgentStatus, PolicyOverrides, RateLimitConfig};
use conductor_core::domain::execution::{ExecutionMode, Run, RunId};
use conductor_core::domain::profile::NarrativeProfileId;
use conductor_core::errors::ApplicationError;
use conductor_engine::{BusEvent, EventKind, ExecuteOutcome, ExecuteRequest};

use crate::api::{claims_from_headers, ApiError, AppState, LimitQuery};

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub role: String,
    #[serde(rename = "agentType")]
    pub agent_type: String,
    pub boundary: Option<String>,
    #[serde(rename = "profileId")]
    pub profile_id: Option<String>,
    #[serde(rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub overrides: PolicyOverrides,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub boundary: Option<String>,
    #[serde(rename = "profileId")]
    pub profile_id: Option<String>,
    #[serde(rename = "rateLimit")]
    pub rate_limit: Option<RateLimitConfig>,
    pub overrides: Option<PolicyOverrides>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteAgentRequest {
    pub mode: String,
    #[serde(rename = "sampleTargets", default)]
    pub sample_targets: Vec<String>,
}

pub async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let agents = state
        .agents
        .list_by_workspace(&claims.workspace_id)
        .await
        .map_err(ApplicationError::persist)?;

    // Agents behind a boundary the caller cannot see are omitted, not
    // surfaced as an error.
    let visible: Vec<Agent> = agents
        .into_iter()
        .filter(|agent| can_access_with_boundary(&claims, agent.boundary.as_deref()))
        .collect();
    Ok(Json(json!({ "agents": visible })))
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    if request.name.trim().is_empty() {
        return Err(ApplicationError::Validation("agent name must not be empty".to_string()).into());
    }

    let now = Utc::now();
    let agent = Agent {
        id: AgentId(Uuid::new_v4().to_string()),
        workspace_id: claims.workspace_id.clone(),
        name: request.name,
        role: request.role,
        agent_type: request.agent_type,
        status: AgentStatus::Draft,
        boundary: request.boundary,
        rate_limit: request.rate_limit.unwrap_or_default(),
        profile_id: request.profile_id.map(NarrativeProfileId),
        overrides: request.overrides,
        created_at: now,
        updated_at: now,
    };

    state.agents.save(agent.clone()).await.map_err(ApplicationError::persist)?;
    state
        .audit
        .append(AuditLogEntry::new(
            agent.workspace_id.clone(),
            claims.actor_id.clone(),
            "agent.created",
            "agent",
            agent.id.0.clone(),
            format!("created as {}", agent.status.as_str()),
        ))
        .await
        .map_err(ApplicationError::persist)?;
    state.bus.publish(
        BusEvent::new(agent.workspace_id.clone(), EventKind::ItemCreated, "agent", agent.id.0.clone())
            .with_status(agent.status.as_str()),
    );

    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let agent = load_agent(&state, &claims, &id).await?;
    Ok(Json(agent))
}

pub async fn update_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let mut agent = load_agent(&state, &claims, &id).await?;
    let previous_status = agent.status;

    if let Some(name) = request.name {
        agent.name = name;
    }
    if let Some(role) = request.role {
        agent.role = role;
    }
    if let Some(boundary) = request.boundary {
        agent.boundary = if boundary.trim().is_empty() { None } else { Some(boundary) };
    }
    if let Some(profile_id) = request.profile_id {
        agent.profile_id =
            if profile_id.trim().is_empty() { None } else { Some(NarrativeProfileId(profile_id)) };
    }
    if let Some(rate_limit) = request.rate_limit {
        agent.rate_limit = rate_limit;
    }
    if let Some(overrides) = request.overrides {
        agent.overrides = overrides;
    }

    if let Some(raw_status) = request.status {
        let to = AgentStatus::parse(&raw_status).ok_or_else(|| {
            ApiError(ApplicationError::Validation(format!("unknown agent status `{raw_status}`")))
        })?;
        agent.transition_status(to).map_err(ApplicationError::from)?;
    }
    agent.updated_at = Utc::now();

    state.agents.save(agent.clone()).await.map_err(ApplicationError::persist)?;

    let action_type = match (previous_status, agent.status) {
        (from, to) if from == to => "agent.updated",
        (_, AgentStatus::Active) => "agent.activated",
        (_, AgentStatus::Paused) => "agent.paused",
        (_, AgentStatus::Draft) => "agent.updated",
    };
    state
        .audit
        .append(AuditLogEntry::new(
            agent.workspace_id.clone(),
            claims.actor_id.clone(),
            action_type,
            "agent",
            agent.id.0.clone(),
            format!("status: {} -> {}", previous_status.as_str(), agent.status.as_str()),
        ))
        .await
        .map_err(ApplicationError::persist)?;
    state.bus.publish(
        BusEvent::new(agent.workspace_id.clone(), EventKind::ItemUpdated, "agent", agent.id.0.clone())
            .with_status(agent.status.as_str()),
    );

    Ok(Json(agent))
}

pub async fn execute_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ExecuteAgentRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let mode = ExecutionMode::parse(&request.mode).ok_or_else(|| {
        ApiError(ApplicationError::Validation(format!(
            "unknown execution mode `{}` (expected DRY_RUN or LIVE)",
            request.mode
        )))
    })?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    let outcome = state
        .orchestrator
        .execute(
            &AgentId(id),
            &claims,
            ExecuteRequest {
                mode,
                sample_targets: request.sample_targets,
                idempotency_key,
                requested_by: claims.actor_id.clone(),
            },
        )
        .await?;

    match outcome {
        ExecuteOutcome::Accepted { job, run } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "deduplicated": false, "job": job, "run": run })),
        )),
        // Dedup hits replay the original run; `run` is null only while
        // the original job is still in flight.
        ExecuteOutcome::Deduplicated { job_id, run } => Ok((
            StatusCode::OK,
            Json(json!({ "deduplicated": true, "jobId": job_id, "run": run })),
        )),
    }
}

pub async fn list_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let agent = load_agent(&state, &claims, &id).await?;
    let runs = state
        .executions
        .list_runs_by_agent(&agent.id, query.limit_or(50))
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let run = state
        .executions
        .find_run_by_id(&RunId(id.clone()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|run| run.workspace_id == claims.workspace_id)
        .ok_or_else(|| ApplicationError::not_found("run", id))?;
    Ok(Json(run))
}

pub async fn list_explainability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let agent = load_agent(&state, &claims, &id).await?;
    let events = state
        .explainability
        .list_by_agent(&agent.id, query.limit_or(100))
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "events": events })))
}

/// Workspace mismatch reads as absence; a boundary mismatch on a known
/// agent is an explicit denial.
async fn load_agent(
    state: &AppState,
    claims: &BoundaryClaims,
    id: &str,
) -> Result<Agent, ApiError> {
    let agent = state
        .agents
        .find_by_id(&AgentId(id.to_string()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|agent| agent.workspace_id == claims.workspace_id)
        .ok_or_else(|| ApplicationError::not_found("agent", id.to_string()))?;

    if !can_access_with_boundary(claims, agent.boundary.as_deref()) {
        return Err(ApplicationError::BoundaryDenied(format!(
            "agent {id} is outside the caller's boundary scopes"
        ))
        .into());
    }
    Ok(agent)
}

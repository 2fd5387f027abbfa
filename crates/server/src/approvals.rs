//! Approval gate endpoints: list the queue, open a checkpoint by hand,
//! and resolve one.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use conductor_core::errors::ApplicationError;

use crate::api::{claims_from_headers, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ApprovalListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApprovalRequest {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "actionType")]
    pub action_type: String,
    #[serde(rename = "payloadPreview")]
    pub payload_preview: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub decision: String,
}

pub async fn list_approvals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ApprovalListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(ApprovalStatus::parse(raw).ok_or_else(|| {
            ApiError(ApplicationError::Validation(format!("unknown approval status `{raw}`")))
        })?),
    };

    let approvals = state
        .approvals
        .list_by_workspace(&claims.workspace_id, status, query.limit.unwrap_or(100).clamp(1, 500))
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "approvals": approvals })))
}

pub async fn create_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateApprovalRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>), ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    if request.action_type.trim().is_empty() {
        return Err(
            ApplicationError::Validation("action type must not be empty".to_string()).into()
        );
    }

    let approval = state
        .gate
        .create(
            claims.workspace_id.clone(),
            AgentId(request.agent_id),
            request.action_type,
            &request.payload_preview,
            None,
            claims.actor_id.clone(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(approval)))
}

pub async fn resolve_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;

    let decision = ApprovalStatus::parse(&request.decision).ok_or_else(|| {
        ApiError(ApplicationError::Validation(format!(
            "unknown approval decision `{}`",
            request.decision
        )))
    })?;

    // Workspace check before touching the gate so callers cannot
    // resolve another workspace's queue.
    let existing = state
        .approvals
        .find_by_id(&ApprovalId(id.clone()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|approval| approval.workspace_id == claims.workspace_id)
        .ok_or_else(|| ApplicationError::not_found("approval_request", id.clone()))?;

    let resolved = state.gate.resolve(&existing.id, decision, claims.actor_id.clone()).await?;
    Ok(Json(resolved))
}

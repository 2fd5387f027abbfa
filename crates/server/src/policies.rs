//! Narrative profile and flow definition endpoints. Both surfaces are
//! versioned documents; writes go through the services so every change
//! lands as a new version with an audit entry.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::flow::{FlowDefinition, FlowDefinitionId, FlowEdge, FlowNode};
use conductor_core::domain::profile::{NarrativeProfile, NarrativeProfileId};
use conductor_core::errors::ApplicationError;

use crate::api::{claims_from_headers, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    pub name: String,
    #[serde(default)]
    pub tone: String,
    #[serde(rename = "allowedTopics", default)]
    pub allowed_topics: Vec<String>,
    #[serde(rename = "blockedTopics", default)]
    pub blocked_topics: Vec<String>,
    #[serde(rename = "allowedPersonalizationFields", default)]
    pub allowed_personalization_fields: Vec<String>,
    #[serde(rename = "topicKeywords", default)]
    pub topic_keywords: BTreeMap<String, Vec<String>>,
    #[serde(rename = "escalationMessage", default)]
    pub escalation_message: String,
    pub boundary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct FlowBody {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Deserialize)]
pub struct FlowListQuery {
    #[serde(rename = "agentId")]
    pub agent_id: String,
}

pub async fn list_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let profiles = state
        .profiles
        .list_by_workspace(&claims.workspace_id)
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "profiles": profiles })))
}

pub async fn create_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProfileBody>,
) -> Result<(StatusCode, Json<NarrativeProfile>), ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let now = Utc::now();
    let profile = NarrativeProfile {
        id: NarrativeProfileId(String::new()),
        workspace_id: claims.workspace_id.clone(),
        name: body.name,
        tone: body.tone,
        allowed_topics: body.allowed_topics,
        blocked_topics: body.blocked_topics,
        allowed_personalization_fields: body.allowed_personalization_fields,
        topic_keywords: body.topic_keywords,
        escalation_message: body.escalation_message,
        boundary: body.boundary,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    let created = state.profile_service.create(profile, &claims.actor_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<NarrativeProfile>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let profile = find_workspace_profile(&state, &claims.workspace_id.0, &id).await?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ProfileBody>,
) -> Result<Json<NarrativeProfile>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let current = find_workspace_profile(&state, &claims.workspace_id.0, &id).await?;

    let updated = NarrativeProfile {
        id: current.id.clone(),
        workspace_id: current.workspace_id.clone(),
        name: body.name,
        tone: body.tone,
        allowed_topics: body.allowed_topics,
        blocked_topics: body.blocked_topics,
        allowed_personalization_fields: body.allowed_personalization_fields,
        topic_keywords: body.topic_keywords,
        escalation_message: body.escalation_message,
        boundary: body.boundary,
        version: current.version,
        created_at: current.created_at,
        updated_at: current.updated_at,
    };

    let saved = state.profile_service.update(updated, &claims.actor_id).await?;
    Ok(Json(saved))
}

pub async fn list_profile_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let profile = find_workspace_profile(&state, &claims.workspace_id.0, &id).await?;
    let versions =
        state.profiles.list_versions(&profile.id).await.map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "versions": versions })))
}

pub async fn rollback_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<NarrativeProfile>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let profile = find_workspace_profile(&state, &claims.workspace_id.0, &id).await?;
    let restored =
        state.profile_service.rollback(&profile.id, request.version, &claims.actor_id).await?;
    Ok(Json(restored))
}

pub async fn list_flows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FlowListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let flows = state
        .flows
        .list_by_agent(&AgentId(query.agent_id))
        .await
        .map_err(ApplicationError::persist)?;
    let flows: Vec<FlowDefinition> =
        flows.into_iter().filter(|flow| flow.workspace_id == claims.workspace_id).collect();
    Ok(Json(json!({ "flows": flows })))
}

pub async fn create_flow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FlowBody>,
) -> Result<(StatusCode, Json<FlowDefinition>), ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let now = Utc::now();
    let flow = FlowDefinition {
        id: FlowDefinitionId(String::new()),
        agent_id: AgentId(body.agent_id),
        workspace_id: claims.workspace_id.clone(),
        nodes: body.nodes,
        edges: body.edges,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    let created = state.flow_service.create(flow, &claims.actor_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_flow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<FlowDefinition>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let flow = find_workspace_flow(&state, &claims.workspace_id.0, &id).await?;
    Ok(Json(flow))
}

pub async fn update_flow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FlowBody>,
) -> Result<Json<FlowDefinition>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let current = find_workspace_flow(&state, &claims.workspace_id.0, &id).await?;

    let updated = FlowDefinition {
        id: current.id.clone(),
        agent_id: current.agent_id.clone(),
        workspace_id: current.workspace_id.clone(),
        nodes: body.nodes,
        edges: body.edges,
        version: current.version,
        created_at: current.created_at,
        updated_at: current.updated_at,
    };

    let saved = state.flow_service.update(updated, &claims.actor_id).await?;
    Ok(Json(saved))
}

pub async fn rollback_flow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<FlowDefinition>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let flow = find_workspace_flow(&state, &claims.workspace_id.0, &id).await?;
    let restored =
        state.flow_service.rollback(&flow.id, request.version, &claims.actor_id).await?;
    Ok(Json(restored))
}

async fn find_workspace_profile(
    state: &AppState,
    workspace_id: &str,
    id: &str,
) -> Result<NarrativeProfile, ApiError> {
    state
        .profiles
        .find_by_id(&NarrativeProfileId(id.to_string()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|profile| profile.workspace_id.0 == workspace_id)
        .ok_or_else(|| ApplicationError::not_found("narrative_profile", id.to_string()).into())
}

async fn find_workspace_flow(
    state: &AppState,
    workspace_id: &str,
    id: &str,
) -> Result<FlowDefinition, ApiError> {
    state
        .flows
        .find_by_id(&FlowDefinitionId(id.to_string()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|flow| flow.workspace_id.0 == workspace_id)
        .ok_or_else(|| ApplicationError::not_found("flow_definition", id.to_string()).into())
}

//! Shared HTTP plumbing: application state, router composition, error
//! mapping, and caller claims extraction.
//!
//! Every request carries its caller identity in headers:
//! - `Authorization: Bearer <token>` when `server.api_token` is set
//! - `X-Workspace-Id` (required) and `X-Actor-Id` (required)
//! - `X-Boundary-Scopes` (optional, comma-separated scope list)

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use secrecy::ExposeSecret;
use serde_json::json;

use conductor_core::boundary::BoundaryClaims;
use conductor_core::config::AppConfig;
use conductor_core::errors::ApplicationError;
use conductor_db::repositories::{
    AgentRepository, ApprovalRepository, AuditLogRepository, ComplianceRepository,
    ExecutionRepository, ExplainabilityRepository, FlowDefinitionRepository,
    NarrativeProfileRepository,
};
use conductor_engine::{ApprovalGate, EventBus, FlowService, Orchestrator, ProfileService};

use crate::{agents, approvals, compliance, evals, events, policies};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub agents: Arc<dyn AgentRepository>,
    pub profiles: Arc<dyn NarrativeProfileRepository>,
    pub flows: Arc<dyn FlowDefinitionRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
    pub compliance: Arc<dyn ComplianceRepository>,
    pub explainability: Arc<dyn ExplainabilityRepository>,
    pub orchestrator: Arc<Orchestrator>,
    pub gate: ApprovalGate,
    pub profile_service: ProfileService,
    pub flow_service: FlowService,
    pub bus: EventBus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/agents/{id}", get(agents::get_agent).put(agents::update_agent))
        .route("/agents/{id}/execute", post(agents::execute_agent))
        .route("/agents/{id}/runs", get(agents::list_runs))
        .route("/agents/{id}/explainability", get(agents::list_explainability))
        .route("/runs/{id}", get(agents::get_run))
        .route(
            "/approval-requests",
            get(approvals::list_approvals).post(approvals::create_approval),
        )
        .route("/approval-requests/{id}/resolve", post(approvals::resolve_approval))
        .route(
            "/narrative-profiles",
            get(policies::list_profiles).post(policies::create_profile),
        )
        .route("/narrative-profiles/{id}", get(policies::get_profile).put(policies::update_profile))
        .route("/narrative-profiles/{id}/versions", get(policies::list_profile_versions))
        .route("/narrative-profiles/{id}/rollback", post(policies::rollback_profile))
        .route("/flow-definitions", get(policies::list_flows).post(policies::create_flow))
        .route("/flow-definitions/{id}", get(policies::get_flow).put(policies::update_flow))
        .route("/flow-definitions/{id}/rollback", post(policies::rollback_flow))
        .route(
            "/compliance-registry/{entity_type}/{entity_id}",
            get(compliance::list_entries),
        )
        .route(
            "/compliance-registry/{entity_type}/{entity_id}/{control_id}",
            put(compliance::upsert_entry),
        )
        .route("/agent-eval", post(evals::run_eval))
        .route("/events", get(events::subscribe))
        .route("/audit-log", get(list_audit_log))
        .with_state(state)
}

/// [`ApplicationError`] carried across the HTTP boundary. Each variant
/// maps to exactly one status class; bodies are uniform
/// `{"error", "message"}` JSON with `retryAfterSecs` added for rate
/// rejections.
#[derive(Debug)]
pub struct ApiError(pub ApplicationError);

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApplicationError::Domain(_) | ApplicationError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApplicationError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApplicationError::PermissionDenied(_) | ApplicationError::BoundaryDenied(_) => {
                StatusCode::FORBIDDEN
            }
            ApplicationError::RateLimited { .. }
            | ApplicationError::ConcurrencyConflict(_) => StatusCode::TOO_MANY_REQUESTS,
            ApplicationError::Persistence(_) | ApplicationError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(
                event_name = "http.internal_error",
                reason = self.0.reason(),
                error = %self.0,
                "request failed with internal error"
            );
        }

        let mut body = json!({
            "error": self.0.reason(),
            "message": self.0.to_string(),
        });
        match &self.0 {
            ApplicationError::RateLimited { retry_after_secs } => {
                body["retryAfterSecs"] = json!(retry_after_secs);
            }
            // In-flight conflicts clear as soon as the running job
            // finishes, so the backoff hint is a short constant.
            ApplicationError::ConcurrencyConflict(_) => {
                body["retryAfterSecs"] = json!(1);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// Resolves the caller's claims from request headers, enforcing the
/// coarse bearer-token check first. Boundary scope checks happen later,
/// per entity.
pub fn claims_from_headers(
    headers: &HeaderMap,
    config: &AppConfig,
) -> Result<BoundaryClaims, ApiError> {
    if let Some(expected) = &config.server.api_token {
        let presented = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .unwrap_or_default();
        if presented != expected.expose_secret() {
            return Err(ApplicationError::PermissionDenied(
                "missing or invalid bearer token".to_string(),
            )
            .into());
        }
    }

    let workspace_id = header_value(headers, "x-workspace-id").ok_or_else(|| {
        ApiError(ApplicationError::Validation("X-Workspace-Id header is required".to_string()))
    })?;
    let actor_id = header_value(headers, "x-actor-id").ok_or_else(|| {
        ApiError(ApplicationError::Validation("X-Actor-Id header is required".to_string()))
    })?;

    let scopes = header_value(headers, "x-boundary-scopes")
        .map(|raw| {
            raw.split(',')
                .map(|scope| scope.trim().to_string())
                .filter(|scope| !scope.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(BoundaryClaims::new(workspace_id, actor_id, scopes))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, serde::Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    pub fn limit_or(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, 500)
    }
}

async fn list_audit_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let entries = state
        .audit
        .list_by_workspace(&claims.workspace_id, query.limit_or(100))
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "entries": entries })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use conductor_core::config::AppConfig;
    use conductor_db::repositories::{
        InMemoryAgentRepository, InMemoryApprovalRepository, InMemoryAuditLogRepository,
        InMemoryComplianceRepository, InMemoryExecutionRepository,
        InMemoryExplainabilityRepository, InMemoryFlowDefinitionRepository,
        InMemoryNarrativeProfileRepository,
    };
    use conductor_engine::{
        ApprovalGate, EventBus, ExecutionControls, FlowService, NoopExecutor, Orchestrator,
        ProfileService,
    };

    use super::{router, AppState};

    fn test_state(config: AppConfig) -> AppState {
        let agents = Arc::new(InMemoryAgentRepository::default());
        let profiles = Arc::new(InMemoryNarrativeProfileRepository::default());
        let flows = Arc::new(InMemoryFlowDefinitionRepository::default());
        let executions = Arc::new(InMemoryExecutionRepository::default());
        let approvals = Arc::new(InMemoryApprovalRepository::default());
        let audit = Arc::new(InMemoryAuditLogRepository::default());
        let compliance = Arc::new(InMemoryComplianceRepository::default());
        let explainability = Arc::new(InMemoryExplainabilityRepository::default());

        let bus = EventBus::default();
        let gate = ApprovalGate::new(approvals.clone(), audit.clone(), bus.clone());
        let orchestrator = Arc::new(Orchestrator::new(
            agents.clone(),
            profiles.clone(),
            executions.clone(),
            explainability.clone(),
            compliance.clone(),
            audit.clone(),
            gate.clone(),
            ExecutionControls::default(),
            Arc::new(NoopExecutor),
            bus.clone(),
            config.execution.clone(),
            config.connectors.clone(),
        ));
        let profile_service = ProfileService::new(profiles.clone(), audit.clone(), bus.clone());
        let flow_service = FlowService::new(flows.clone(), audit.clone(), bus.clone());

        AppState {
            config: Arc::new(config),
            agents,
            profiles,
            flows,
            executions,
            approvals,
            audit,
            compliance,
            explainability,
            orchestrator,
            gate,
            profile_service,
            flow_service,
            bus,
        }
    }

    fn app() -> Router {
        router(test_state(AppConfig::default()))
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-workspace-id", "ws-1")
            .header("x-actor-id", "staff-1")
            .header("content-type", "application/json");
        match body {
            Some(value) => builder.body(Body::from(value.to_string())).expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn agent_body() -> Value {
        json!({
            "name": "Outreach assistant",
            "role": "advisor",
            "agentType": "outreach",
            "overrides": { "allowed_personalization_fields": ["first_name"] }
        })
    }

    #[tokio::test]
    async fn missing_workspace_header_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/agents")
                    .header("x-actor-id", "staff-1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn bearer_token_is_enforced_when_configured() {
        let mut config = AppConfig::default();
        config.server.api_token = Some("secret-token".to_string().into());
        let router = router(test_state(config));

        let response =
            router.clone().oneshot(request("GET", "/agents", None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let mut authorized = request("GET", "/agents", None);
        authorized
            .headers_mut()
            .insert("authorization", "Bearer secret-token".parse().expect("header"));
        let response = router.oneshot(authorized).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn agent_lifecycle_create_activate_execute() {
        let router = app();

        let response = router
            .clone()
            .oneshot(request("POST", "/agents", Some(agent_body())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["status"], "DRAFT");
        let agent_id = created["id"].as_str().expect("agent id").to_string();

        // Draft agents cannot execute.
        let response = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/agents/{agent_id}/execute"),
                Some(json!({ "mode": "DRY_RUN", "sampleTargets": ["person-1"] })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/agents/{agent_id}"),
                Some(json!({ "status": "ACTIVE" })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/agents/{agent_id}/execute"),
                Some(json!({ "mode": "DRY_RUN", "sampleTargets": ["person-1", "person-2"] })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["deduplicated"], false);
        assert_eq!(body["run"]["status"], "COMPLETED");
        assert_eq!(body["run"]["counts"]["executed"], 2);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_deduplicates() {
        let router = app();

        let response = router
            .clone()
            .oneshot(request("POST", "/agents", Some(agent_body())))
            .await
            .expect("response");
        let agent_id = json_body(response).await["id"].as_str().expect("id").to_string();
        router
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/agents/{agent_id}"),
                Some(json!({ "status": "ACTIVE" })),
            ))
            .await
            .expect("response");

        let execute = || {
            let mut req = request(
                "POST",
                &format!("/agents/{agent_id}/execute"),
                Some(json!({ "mode": "DRY_RUN", "sampleTargets": ["person-1"] })),
            );
            req.headers_mut().insert("idempotency-key", "batch-42".parse().expect("header"));
            req
        };

        let first = router.clone().oneshot(execute()).await.expect("response");
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let first_body = json_body(first).await;

        let second = router.clone().oneshot(execute()).await.expect("response");
        assert_eq!(second.status(), StatusCode::OK);
        let second_body = json_body(second).await;
        assert_eq!(second_body["deduplicated"], true);
        assert_eq!(second_body["jobId"], first_body["job"]["id"]);
        // The original run rides along with the replay.
        assert_eq!(second_body["run"]["id"], first_body["run"]["id"]);
    }

    #[tokio::test]
    async fn approval_resolution_is_terminal_once() {
        let router = app();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/approval-requests",
                Some(json!({
                    "agentId": "agent-1",
                    "actionType": "send_message",
                    "payloadPreview": "Reach me at staff@example.edu"
                })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let approval = json_body(response).await;
        let approval_id = approval["id"].as_str().expect("approval id").to_string();
        // The preview is redacted before it is stored.
        assert!(!approval["payload_preview"].as_str().expect("preview").contains("example.edu"));

        let resolve = |decision: &str| {
            request(
                "POST",
                &format!("/approval-requests/{approval_id}/resolve"),
                Some(json!({ "decision": decision })),
            )
        };

        let first = router.clone().oneshot(resolve("APPROVED")).await.expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let second = router.clone().oneshot(resolve("REJECTED")).await.expect("response");
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        let body = json_body(second).await;
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn unknown_compliance_control_is_rejected() {
        let response = app()
            .oneshot(request(
                "PUT",
                "/compliance-registry/agent/agent-1/MADE_UP_CONTROL",
                Some(json!({ "status": "PASS" })),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn profile_rollback_round_trip_over_http() {
        let router = app();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/narrative-profiles",
                Some(json!({ "name": "Advisor voice", "tone": "warm" })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let profile = json_body(response).await;
        let profile_id = profile["id"].as_str().expect("profile id").to_string();

        let response = router
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/narrative-profiles/{profile_id}"),
                Some(json!({ "name": "Advisor voice", "tone": "direct" })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/narrative-profiles/{profile_id}/rollback"),
                Some(json!({ "version": 1 })),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let restored = json_body(response).await;
        assert_eq!(restored["tone"], "warm");
        assert_eq!(restored["version"], 3);
    }

    #[tokio::test]
    async fn eval_endpoint_scores_cases_against_agent_policy() {
        let router = app();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/agents",
                Some(json!({
                    "name": "Outreach assistant",
                    "role": "advisor",
                    "agentType": "outreach",
                    "overrides": { "blocked_topics": ["Financial aid"] }
                })),
            ))
            .await
            .expect("response");
        let agent_id = json_body(response).await["id"].as_str().expect("id").to_string();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/agent-eval",
                Some(json!({
                    "agentId": agent_id,
                    "cases": [
                        {
                            "name": "fafsa-blocked",
                            "message": "Your FAFSA is due Friday",
                            "expected": "FAIL"
                        },
                        {
                            "name": "welcome-passes",
                            "message": "Welcome to campus!",
                            "expected": "PASS"
                        }
                    ]
                })),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["matched"], 2);
        assert_eq!(body["allPassed"], true);
    }
}

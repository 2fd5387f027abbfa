//! Offline guardrail eval endpoint. Scores named regression cases
//! against an agent's effective policy with the exact evaluator that
//! guards live runs.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use conductor_core::domain::agent::AgentId;
use conductor_core::errors::ApplicationError;
use conductor_core::guardrail::{
    resolve_effective_policy, run_eval_cases, EffectivePolicy, EvalCase, GuardrailOutcome,
};

use crate::api::{claims_from_headers, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct EvalRequest {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(default)]
    pub cases: Vec<EvalCase>,
    #[serde(rename = "sampleContext", default)]
    pub sample_context: Option<SampleContext>,
}

#[derive(Debug, Deserialize)]
pub struct SampleContext {
    #[serde(rename = "messagePreview")]
    pub message_preview: String,
}

impl EvalRequest {
    /// A bare `sampleContext.messagePreview` is shorthand for a single
    /// case that is expected to pass.
    fn into_cases(self) -> (String, Vec<EvalCase>) {
        let mut cases = self.cases;
        if let Some(context) = self.sample_context {
            cases.push(EvalCase {
                name: "sample-context".to_string(),
                message: context.message_preview,
                expected: GuardrailOutcome::Pass,
            });
        }
        (self.agent_id, cases)
    }
}

pub async fn run_eval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EvalRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;
    let (agent_id, cases) = request.into_cases();
    if cases.is_empty() {
        return Err(
            ApplicationError::Validation("at least one eval case is required".to_string()).into()
        );
    }

    let agent = state
        .agents
        .find_by_id(&AgentId(agent_id.clone()))
        .await
        .map_err(ApplicationError::persist)?
        .filter(|agent| agent.workspace_id == claims.workspace_id)
        .ok_or_else(|| ApplicationError::not_found("agent", agent_id.clone()))?;

    let policy = match &agent.profile_id {
        Some(profile_id) => {
            let profile = state
                .profiles
                .find_by_id(profile_id)
                .await
                .map_err(ApplicationError::persist)?
                .ok_or_else(|| {
                    ApplicationError::not_found("narrative_profile", profile_id.0.clone())
                })?;
            resolve_effective_policy(&profile, &agent.overrides)
        }
        None => EffectivePolicy {
            allowed_topics: agent.overrides.allowed_topics.clone(),
            blocked_topics: agent.overrides.blocked_topics.clone(),
            allowed_personalization_fields: agent
                .overrides
                .allowed_personalization_fields
                .clone(),
            ..EffectivePolicy::default()
        },
    };

    let results = run_eval_cases(&policy, &cases);
    let matched = results.iter().filter(|result| result.matched).count();

    tracing::info!(
        event_name = "eval.completed",
        agent_id = %agent.id.0,
        total = results.len(),
        matched,
        "guardrail eval completed"
    );

    Ok(Json(json!({
        "total": results.len(),
        "matched": matched,
        "allPassed": matched == results.len(),
        "results": results,
    })))
}

//! Compliance registry endpoints. The registry stores current state
//! only; history is reconstructed from the audit log.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use conductor_core::audit::AuditLogEntry;
use conductor_core::domain::compliance::{ComplianceEntry, ComplianceStatus, ControlId};
use conductor_core::errors::ApplicationError;
use conductor_engine::{BusEvent, EventKind};

use crate::api::{claims_from_headers, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct UpsertEntryRequest {
    pub status: String,
    #[serde(rename = "evidenceLink")]
    pub evidence_link: Option<String>,
}

pub async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    claims_from_headers(&headers, &state.config)?;
    let entries = state
        .compliance
        .list_for_entity(&entity_type, &entity_id)
        .await
        .map_err(ApplicationError::persist)?;
    Ok(Json(json!({ "entries": entries })))
}

pub async fn upsert_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity_type, entity_id, control_id)): Path<(String, String, String)>,
    Json(request): Json<UpsertEntryRequest>,
) -> Result<Json<ComplianceEntry>, ApiError> {
    let claims = claims_from_headers(&headers, &state.config)?;

    // The control set is closed; anything outside it is a caller error,
    // not a new row.
    let control = ControlId::parse(&control_id).ok_or_else(|| {
        ApiError(ApplicationError::Validation(format!("unknown control id `{control_id}`")))
    })?;
    let status = ComplianceStatus::parse(&request.status).ok_or_else(|| {
        ApiError(ApplicationError::Validation(format!(
            "unknown compliance status `{}` (expected PASS, FAIL, or NA)",
            request.status
        )))
    })?;

    let entry = ComplianceEntry {
        entity_type: entity_type.clone(),
        entity_id: entity_id.clone(),
        control_id: control,
        status,
        evidence_link: request.evidence_link,
        updated_at: Utc::now(),
    };
    state.compliance.upsert(entry.clone()).await.map_err(ApplicationError::persist)?;

    state
        .audit
        .append(
            AuditLogEntry::new(
                claims.workspace_id.clone(),
                claims.actor_id.clone(),
                "compliance.updated",
                entity_type.clone(),
                entity_id.clone(),
                format!("{}: {}", control.as_str(), status.as_str()),
            )
            .with_metadata("control_id", control.as_str()),
        )
        .await
        .map_err(ApplicationError::persist)?;
    state.bus.publish(
        BusEvent::new(claims.workspace_id.clone(), EventKind::ItemUpdated, entity_type, entity_id)
            .with_status(status.as_str()),
    );

    Ok(Json(entry))
}

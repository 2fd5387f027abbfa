//! Human-in-the-loop approval gate.
//!
//! Every request enters PENDING and resolves exactly once to APPROVED
//! or REJECTED. Payload previews are redacted before they are stored;
//! raw contact details never reach the database or the bus.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use conductor_core::audit::AuditLogEntry;
use conductor_core::domain::agent::AgentId;
use conductor_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use conductor_core::domain::execution::RunId;
use conductor_core::domain::WorkspaceId;
use conductor_core::errors::ApplicationError;
use conductor_core::redaction::redact_text;
use conductor_db::repositories::{ApprovalRepository, AuditLogRepository};

use crate::bus::{BusEvent, EventBus, EventKind};

#[derive(Clone)]
pub struct ApprovalGate {
    approvals: Arc<dyn ApprovalRepository>,
    audit: Arc<dyn AuditLogRepository>,
    bus: EventBus,
}

impl ApprovalGate {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        audit: Arc<dyn AuditLogRepository>,
        bus: EventBus,
    ) -> Self {
        Self { approvals, audit, bus }
    }

    pub async fn create(
        &self,
        workspace_id: WorkspaceId,
        agent_id: AgentId,
        action_type: impl Into<String>,
        payload_preview: &str,
        run_id: Option<RunId>,
        requested_by: impl Into<String>,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let approval = ApprovalRequest {
            id: ApprovalId(Uuid::new_v4().to_string()),
            workspace_id: workspace_id.clone(),
            agent_id: agent_id.clone(),
            action_type: action_type.into(),
            payload_preview: redact_text(payload_preview),
            run_id,
            status: ApprovalStatus::Pending,
            requested_by: requested_by.into(),
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        self.approvals.save(approval.clone()).await.map_err(ApplicationError::persist)?;

        let entry = AuditLogEntry::new(
            workspace_id.clone(),
            approval.requested_by.clone(),
            "approval.created",
            "approval_request",
            approval.id.0.clone(),
            format!("approval requested for {}", approval.action_type),
        )
        .with_metadata("agent_id", agent_id.0.clone());
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        self.bus.publish(
            BusEvent::new(
                workspace_id,
                EventKind::ApprovalCreated,
                "approval_request",
                approval.id.0.clone(),
            )
            .with_status(approval.status.as_str()),
        );

        tracing::info!(
            event_name = "approval.created",
            approval_id = %approval.id.0,
            agent_id = %agent_id.0,
            action_type = %approval.action_type,
            "approval request created"
        );

        Ok(approval)
    }

    /// Resolves a pending request. Resolving an already-terminal
    /// request is rejected: the first decision stands.
    pub async fn resolve(
        &self,
        id: &ApprovalId,
        decision: ApprovalStatus,
        resolved_by: impl Into<String>,
    ) -> Result<ApprovalRequest, ApplicationError> {
        if !decision.is_terminal() {
            return Err(ApplicationError::Validation(
                "resolution must be APPROVED or REJECTED".to_string(),
            ));
        }

        let mut approval = self
            .approvals
            .find_by_id(id)
            .await
            .map_err(ApplicationError::persist)?
            .ok_or_else(|| ApplicationError::not_found("approval_request", id.0.clone()))?;

        if approval.status.is_terminal() {
            return Err(ApplicationError::Validation(format!(
                "approval {} already resolved as {}",
                id.0,
                approval.status.as_str()
            )));
        }

        let resolved_by = resolved_by.into();
        approval.status = decision;
        approval.resolved_by = Some(resolved_by.clone());
        approval.resolved_at = Some(Utc::now());

        self.approvals.save(approval.clone()).await.map_err(ApplicationError::persist)?;

        let action_type = match decision {
            ApprovalStatus::Approved => "approval.approved",
            _ => "approval.rejected",
        };
        let entry = AuditLogEntry::new(
            approval.workspace_id.clone(),
            resolved_by,
            action_type,
            "approval_request",
            approval.id.0.clone(),
            format!("status: PENDING -> {}", approval.status.as_str()),
        );
        self.audit.append(entry).await.map_err(ApplicationError::persist)?;

        let kind = match decision {
            ApprovalStatus::Approved => EventKind::ApprovalApproved,
            _ => EventKind::ApprovalRejected,
        };
        self.bus.publish(
            BusEvent::new(
                approval.workspace_id.clone(),
                kind,
                "approval_request",
                approval.id.0.clone(),
            )
            .with_status(approval.status.as_str()),
        );

        Ok(approval)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conductor_core::domain::agent::AgentId;
    use conductor_core::domain::approval::ApprovalStatus;
    use conductor_core::domain::WorkspaceId;
    use conductor_core::errors::ApplicationError;
    use conductor_db::repositories::{
        ApprovalRepository, AuditLogRepository, InMemoryApprovalRepository,
        InMemoryAuditLogRepository,
    };

    use crate::bus::{EventBus, EventKind};

    use super::ApprovalGate;

    fn gate() -> (ApprovalGate, Arc<InMemoryApprovalRepository>, Arc<InMemoryAuditLogRepository>, EventBus)
    {
        let approvals = Arc::new(InMemoryApprovalRepository::default());
        let audit = Arc::new(InMemoryAuditLogRepository::default());
        let bus = EventBus::default();
        let gate = ApprovalGate::new(approvals.clone(), audit.clone(), bus.clone());
        (gate, approvals, audit, bus)
    }

    fn ws() -> WorkspaceId {
        WorkspaceId("ws-1".to_string())
    }

    #[tokio::test]
    async fn create_redacts_preview_and_publishes() {
        let (gate, approvals, _audit, bus) = gate();
        let mut rx = bus.subscribe(&ws());

        let approval = gate
            .create(
                ws(),
                AgentId("agent-1".to_string()),
                "send_message",
                "Reach me at jordan@example.edu or +1 (555) 123-4567.",
                None,
                "user-1",
            )
            .await
            .expect("create");

        assert!(approval.payload_preview.contains("[redacted-email]"));
        assert!(approval.payload_preview.contains("[redacted-phone]"));
        assert_eq!(approval.status, ApprovalStatus::Pending);

        let stored = approvals
            .find_by_id(&approval.id)
            .await
            .expect("find")
            .expect("should exist");
        assert!(!stored.payload_preview.contains("jordan@example.edu"));

        let event = rx.recv().await.expect("bus event");
        assert_eq!(event.kind, EventKind::ApprovalCreated);
    }

    #[tokio::test]
    async fn resolve_is_terminal_once() {
        let (gate, _approvals, audit, _bus) = gate();

        let approval = gate
            .create(ws(), AgentId("agent-1".to_string()), "send_message", "hello", None, "user-1")
            .await
            .expect("create");

        let resolved = gate
            .resolve(&approval.id, ApprovalStatus::Approved, "user-2")
            .await
            .expect("resolve");
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("user-2"));
        assert!(resolved.resolved_at.is_some());

        let second = gate.resolve(&approval.id, ApprovalStatus::Rejected, "user-3").await;
        assert!(matches!(second, Err(ApplicationError::Validation(_))));

        let entries = audit.list_by_workspace(&ws(), 10).await.expect("audit entries");
        assert!(entries.iter().any(|e| e.action_type == "approval.approved"));
        assert!(!entries.iter().any(|e| e.action_type == "approval.rejected"));
    }

    #[tokio::test]
    async fn resolve_rejects_pending_as_decision() {
        let (gate, _approvals, _audit, _bus) = gate();

        let approval = gate
            .create(ws(), AgentId("agent-1".to_string()), "send_message", "hello", None, "user-1")
            .await
            .expect("create");

        let result = gate.resolve(&approval.id, ApprovalStatus::Pending, "user-2").await;
        assert!(matches!(result, Err(ApplicationError::Validation(_))));
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_not_found() {
        let (gate, _approvals, _audit, _bus) = gate();
        let missing = conductor_core::domain::approval::ApprovalId("missing".to_string());

        let result = gate.resolve(&missing, ApprovalStatus::Approved, "user-2").await;
        assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
    }
}

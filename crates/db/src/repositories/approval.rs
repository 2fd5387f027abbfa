use sqlx::Row;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use conductor_core::domain::execution::RunId;
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, parse_datetime_opt, ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let agent_id: String = row.try_get("agent_id").map_err(decode_error)?;
    let action_type: String = row.try_get("action_type").map_err(decode_error)?;
    let payload_preview: String = row.try_get("payload_preview").map_err(decode_error)?;
    let run_id: Option<String> = row.try_get("run_id").map_err(decode_error)?;
    let status_str: String = row.try_get("status").map_err(decode_error)?;
    let requested_by: String = row.try_get("requested_by").map_err(decode_error)?;
    let resolved_by: Option<String> = row.try_get("resolved_by").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;
    let resolved_at_str: Option<String> = row.try_get("resolved_at").map_err(decode_error)?;

    let status = ApprovalStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval status: {status_str}"))
    })?;

    Ok(ApprovalRequest {
        id: ApprovalId(id),
        workspace_id: WorkspaceId(workspace_id),
        agent_id: AgentId(agent_id),
        action_type,
        payload_preview,
        run_id: run_id.map(RunId),
        status,
        requested_by,
        resolved_by,
        created_at: parse_datetime(&created_at_str),
        resolved_at: parse_datetime_opt(resolved_at_str),
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, agent_id, action_type, payload_preview, run_id, status,
                    requested_by, resolved_by, created_at, resolved_at
             FROM approval_request WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_request (id, workspace_id, agent_id, action_type,
                                           payload_preview, run_id, status, requested_by,
                                           resolved_by, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 resolved_by = excluded.resolved_by,
                 resolved_at = excluded.resolved_at",
        )
        .bind(&approval.id.0)
        .bind(&approval.workspace_id.0)
        .bind(&approval.agent_id.0)
        .bind(&approval.action_type)
        .bind(&approval.payload_preview)
        .bind(approval.run_id.as_ref().map(|r| r.0.as_str()))
        .bind(approval.status.as_str())
        .bind(&approval.requested_by)
        .bind(&approval.resolved_by)
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.resolved_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        status: Option<ApprovalStatus>,
        limit: u32,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = if let Some(status) = status {
            sqlx::query(
                "SELECT id, workspace_id, agent_id, action_type, payload_preview, run_id,
                        status, requested_by, resolved_by, created_at, resolved_at
                 FROM approval_request
                 WHERE workspace_id = ? AND status = ?
                 ORDER BY created_at ASC
                 LIMIT ?",
            )
            .bind(&workspace_id.0)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, workspace_id, agent_id, action_type, payload_preview, run_id,
                        status, requested_by, resolved_by, created_at, resolved_at
                 FROM approval_request
                 WHERE workspace_id = ?
                 ORDER BY created_at ASC
                 LIMIT ?",
            )
            .bind(&workspace_id.0)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::agent::AgentId;
    use conductor_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
    use conductor_core::domain::WorkspaceId;

    use super::SqlApprovalRepository;
    use crate::repositories::ApprovalRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_approval(id: &str, workspace: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalId(id.to_string()),
            workspace_id: WorkspaceId(workspace.to_string()),
            agent_id: AgentId("agent-1".to_string()),
            action_type: "send_message".to_string(),
            payload_preview: "Hi [first_name], your aid package is ready.".to_string(),
            run_id: None,
            status: ApprovalStatus::Pending,
            requested_by: "agent:conductor".to_string(),
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn save_and_find_by_id() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);

        let approval = sample_approval("apr-1", "ws-1");
        repo.save(approval.clone()).await.expect("save");

        let found = repo
            .find_by_id(&ApprovalId("apr-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.id, approval.id);
        assert_eq!(found.status, ApprovalStatus::Pending);
        assert!(found.resolved_at.is_none());
    }

    #[tokio::test]
    async fn list_by_workspace_filters_by_status() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);

        repo.save(sample_approval("apr-1", "ws-1")).await.expect("save 1");
        repo.save(sample_approval("apr-2", "ws-1")).await.expect("save 2");

        let mut resolved = sample_approval("apr-3", "ws-1");
        resolved.status = ApprovalStatus::Approved;
        resolved.resolved_by = Some("user-2".to_string());
        resolved.resolved_at = Some(Utc::now());
        repo.save(resolved).await.expect("save 3");

        repo.save(sample_approval("apr-4", "ws-2")).await.expect("save 4");

        let ws = WorkspaceId("ws-1".to_string());
        let all = repo.list_by_workspace(&ws, None, 100).await.expect("list all");
        assert_eq!(all.len(), 3);

        let pending = repo
            .list_by_workspace(&ws, Some(ApprovalStatus::Pending), 100)
            .await
            .expect("list pending");
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn save_upserts_resolution_fields() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);

        let approval = sample_approval("apr-1", "ws-1");
        repo.save(approval.clone()).await.expect("save");

        let mut resolved = approval;
        resolved.status = ApprovalStatus::Rejected;
        resolved.resolved_by = Some("user-2".to_string());
        resolved.resolved_at = Some(Utc::now());
        repo.save(resolved).await.expect("upsert");

        let found = repo
            .find_by_id(&ApprovalId("apr-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.status, ApprovalStatus::Rejected);
        assert_eq!(found.resolved_by.as_deref(), Some("user-2"));
    }
}

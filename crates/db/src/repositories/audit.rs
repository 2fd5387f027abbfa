use std::collections::BTreeMap;

use sqlx::Row;

use conductor_core::audit::AuditLogEntry;
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, AuditLogRepository, RepositoryError};
use crate::DbPool;

/// Insert-only. There is deliberately no update or delete statement in
/// this file.
pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditLogEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let actor_id: String = row.try_get("actor_id").map_err(decode_error)?;
    let action_type: String = row.try_get("action_type").map_err(decode_error)?;
    let entity_type: String = row.try_get("entity_type").map_err(decode_error)?;
    let entity_id: String = row.try_get("entity_id").map_err(decode_error)?;
    let diff_summary: String = row.try_get("diff_summary").map_err(decode_error)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_error)?;
    let occurred_at_str: String = row.try_get("occurred_at").map_err(decode_error)?;

    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(decode_error)?;

    Ok(AuditLogEntry {
        id,
        workspace_id: WorkspaceId(workspace_id),
        actor_id,
        action_type,
        entity_type,
        entity_id,
        diff_summary,
        metadata,
        occurred_at: parse_datetime(&occurred_at_str),
    })
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&entry.metadata).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO audit_log (id, workspace_id, actor_id, action_type, entity_type,
                                    entity_id, diff_summary, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.workspace_id.0)
        .bind(&entry.actor_id)
        .bind(&entry.action_type)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.diff_summary)
        .bind(&metadata_json)
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, workspace_id, actor_id, action_type, entity_type, entity_id,
                    diff_summary, metadata_json, occurred_at
             FROM audit_log WHERE workspace_id = ? ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(&workspace_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use conductor_core::audit::AuditLogEntry;
    use conductor_core::domain::WorkspaceId;

    use super::SqlAuditLogRepository;
    use crate::repositories::AuditLogRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn append_and_list_round_trips_metadata() {
        let pool = setup().await;
        let repo = SqlAuditLogRepository::new(pool);

        let entry = AuditLogEntry::new(
            WorkspaceId("ws-1".to_string()),
            "user-1",
            "agent.activated",
            "agent",
            "agent-1",
            "status: DRAFT -> ACTIVE",
        )
        .with_metadata("correlation_id", "corr-1");

        repo.append(entry.clone()).await.expect("append");

        let entries = repo
            .list_by_workspace(&WorkspaceId("ws-1".to_string()), 10)
            .await
            .expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_type, "agent.activated");
        assert_eq!(entries[0].metadata.get("correlation_id").map(String::as_str), Some("corr-1"));
    }

    #[tokio::test]
    async fn list_is_workspace_scoped() {
        let pool = setup().await;
        let repo = SqlAuditLogRepository::new(pool);

        for ws in ["ws-1", "ws-1", "ws-2"] {
            let entry = AuditLogEntry::new(
                WorkspaceId(ws.to_string()),
                "user-1",
                "approval.created",
                "approval_request",
                "apr-1",
                "created",
            );
            repo.append(entry).await.expect("append");
        }

        let ws1 = repo
            .list_by_workspace(&WorkspaceId("ws-1".to_string()), 10)
            .await
            .expect("list");
        assert_eq!(ws1.len(), 2);
    }
}

use sqlx::Row;

use conductor_core::domain::compliance::{ComplianceEntry, ComplianceStatus, ControlId};

use super::{decode_error, parse_datetime, ComplianceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlComplianceRepository {
    pool: DbPool,
}

impl SqlComplianceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ComplianceEntry, RepositoryError> {
    let entity_type: String = row.try_get("entity_type").map_err(decode_error)?;
    let entity_id: String = row.try_get("entity_id").map_err(decode_error)?;
    let control_str: String = row.try_get("control_id").map_err(decode_error)?;
    let status_str: String = row.try_get("status").map_err(decode_error)?;
    let evidence_link: Option<String> = row.try_get("evidence_link").map_err(decode_error)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode_error)?;

    let control_id = ControlId::parse(&control_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown control id: {control_str}")))?;
    let status = ComplianceStatus::parse(&status_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown compliance status: {status_str}"))
    })?;

    Ok(ComplianceEntry {
        entity_type,
        entity_id,
        control_id,
        status,
        evidence_link,
        updated_at: parse_datetime(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl ComplianceRepository for SqlComplianceRepository {
    async fn upsert(&self, entry: ComplianceEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO compliance_entry (entity_type, entity_id, control_id, status,
                                           evidence_link, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_type, entity_id, control_id) DO UPDATE SET
                 status = excluded.status,
                 evidence_link = excluded.evidence_link,
                 updated_at = excluded.updated_at",
        )
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.control_id.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.evidence_link)
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        entity_type: &str,
        entity_id: &str,
        control_id: ControlId,
    ) -> Result<Option<ComplianceEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT entity_type, entity_id, control_id, status, evidence_link, updated_at
             FROM compliance_entry
             WHERE entity_type = ? AND entity_id = ? AND control_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(control_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_entry(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ComplianceEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT entity_type, entity_id, control_id, status, evidence_link, updated_at
             FROM compliance_entry
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY control_id ASC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::compliance::{ComplianceEntry, ComplianceStatus, ControlId};

    use super::SqlComplianceRepository;
    use crate::repositories::ComplianceRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn entry(control_id: ControlId, status: ComplianceStatus) -> ComplianceEntry {
        ComplianceEntry {
            entity_type: "agent".to_string(),
            entity_id: "agent-1".to_string(),
            control_id,
            status,
            evidence_link: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_status_for_same_key() {
        let pool = setup().await;
        let repo = SqlComplianceRepository::new(pool);

        repo.upsert(entry(ControlId::ConsentOnFile, ComplianceStatus::Fail))
            .await
            .expect("first upsert");
        let mut updated = entry(ControlId::ConsentOnFile, ComplianceStatus::Pass);
        updated.evidence_link = Some("https://records.example/consent/1".to_string());
        repo.upsert(updated).await.expect("second upsert");

        let found = repo
            .find("agent", "agent-1", ControlId::ConsentOnFile)
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.status, ComplianceStatus::Pass);
        assert!(found.evidence_link.is_some());

        let all = repo.list_for_entity("agent", "agent-1").await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn controls_are_independent_rows() {
        let pool = setup().await;
        let repo = SqlComplianceRepository::new(pool);

        for control in ControlId::ALL {
            repo.upsert(entry(control, ComplianceStatus::Na)).await.expect("upsert");
        }

        let all = repo.list_for_entity("agent", "agent-1").await.expect("list");
        assert_eq!(all.len(), ControlId::ALL.len());
    }
}

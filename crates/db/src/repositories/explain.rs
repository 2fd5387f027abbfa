use sqlx::Row;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::execution::RunId;
use conductor_core::domain::explain::{
    ExplainabilityEvent, ExplainabilityEventId, ExplainabilityKind,
};

use super::{decode_error, parse_datetime, ExplainabilityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlExplainabilityRepository {
    pool: DbPool,
}

impl SqlExplainabilityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<ExplainabilityEvent, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let agent_id: String = row.try_get("agent_id").map_err(decode_error)?;
    let run_id: Option<String> = row.try_get("run_id").map_err(decode_error)?;
    let kind_str: String = row.try_get("kind").map_err(decode_error)?;
    let summary: String = row.try_get("summary").map_err(decode_error)?;
    let details_json: String = row.try_get("details_json").map_err(decode_error)?;
    let occurred_at_str: String = row.try_get("occurred_at").map_err(decode_error)?;

    let kind = ExplainabilityKind::parse(&kind_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown explainability kind: {kind_str}"))
    })?;
    let details: serde_json::Value =
        serde_json::from_str(&details_json).map_err(decode_error)?;

    Ok(ExplainabilityEvent {
        id: ExplainabilityEventId(id),
        agent_id: AgentId(agent_id),
        run_id: run_id.map(RunId),
        kind,
        summary,
        details,
        occurred_at: parse_datetime(&occurred_at_str),
    })
}

#[async_trait::async_trait]
impl ExplainabilityRepository for SqlExplainabilityRepository {
    async fn append(&self, event: ExplainabilityEvent) -> Result<(), RepositoryError> {
        let details_json = serde_json::to_string(&event.details).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO explainability_event (id, agent_id, run_id, kind, summary,
                                               details_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(&event.agent_id.0)
        .bind(event.run_id.as_ref().map(|r| r.0.as_str()))
        .bind(event.kind.as_str())
        .bind(&event.summary)
        .bind(&details_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ExplainabilityEvent>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, agent_id, run_id, kind, summary, details_json, occurred_at
             FROM explainability_event WHERE run_id = ? ORDER BY occurred_at ASC",
        )
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<ExplainabilityEvent>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, agent_id, run_id, kind, summary, details_json, occurred_at
             FROM explainability_event WHERE agent_id = ? ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(&agent_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }
}

use sqlx::Row;

use conductor_core::domain::agent::{
    Agent, AgentId, AgentStatus, PolicyOverrides, RateLimitConfig,
};
use conductor_core::domain::profile::NarrativeProfileId;
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, AgentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const AGENT_COLUMNS: &str = "id, workspace_id, name, role, agent_type, status, boundary,
     rate_max_runs_per_window, rate_window_secs, profile_id, overrides_json,
     created_at, updated_at";

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let role: String = row.try_get("role").map_err(decode_error)?;
    let agent_type: String = row.try_get("agent_type").map_err(decode_error)?;
    let status_str: String = row.try_get("status").map_err(decode_error)?;
    let boundary: Option<String> = row.try_get("boundary").map_err(decode_error)?;
    let rate_max: i64 = row.try_get("rate_max_runs_per_window").map_err(decode_error)?;
    let rate_window: i64 = row.try_get("rate_window_secs").map_err(decode_error)?;
    let profile_id: Option<String> = row.try_get("profile_id").map_err(decode_error)?;
    let overrides_json: String = row.try_get("overrides_json").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode_error)?;

    let status = AgentStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown agent status: {status_str}")))?;
    let overrides: PolicyOverrides =
        serde_json::from_str(&overrides_json).map_err(decode_error)?;

    Ok(Agent {
        id: AgentId(id),
        workspace_id: WorkspaceId(workspace_id),
        name,
        role,
        agent_type,
        status,
        boundary,
        rate_limit: RateLimitConfig {
            max_runs_per_window: rate_max.max(0) as u32,
            window_secs: rate_window.max(0) as u64,
        },
        profile_id: profile_id.map(NarrativeProfileId),
        overrides,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agent WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_agent(r)?)),
            None => Ok(None),
        }
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Agent>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent WHERE workspace_id = ? ORDER BY created_at ASC"
        ))
        .bind(&workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_agent).collect::<Result<Vec<_>, _>>()
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let overrides_json = serde_json::to_string(&agent.overrides).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO agent (id, workspace_id, name, role, agent_type, status, boundary,
                                rate_max_runs_per_window, rate_window_secs, profile_id,
                                overrides_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 role = excluded.role,
                 agent_type = excluded.agent_type,
                 status = excluded.status,
                 boundary = excluded.boundary,
                 rate_max_runs_per_window = excluded.rate_max_runs_per_window,
                 rate_window_secs = excluded.rate_window_secs,
                 profile_id = excluded.profile_id,
                 overrides_json = excluded.overrides_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.workspace_id.0)
        .bind(&agent.name)
        .bind(&agent.role)
        .bind(&agent.agent_type)
        .bind(agent.status.as_str())
        .bind(&agent.boundary)
        .bind(agent.rate_limit.max_runs_per_window as i64)
        .bind(agent.rate_limit.window_secs as i64)
        .bind(agent.profile_id.as_ref().map(|p| p.0.as_str()))
        .bind(&overrides_json)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::agent::{
        Agent, AgentId, AgentStatus, PolicyOverrides, RateLimitConfig,
    };
    use conductor_core::domain::WorkspaceId;

    use super::SqlAgentRepository;
    use crate::repositories::AgentRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_agent(id: &str, workspace: &str) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId(id.to_string()),
            workspace_id: WorkspaceId(workspace.to_string()),
            name: "Outreach coordinator".to_string(),
            role: "advisor".to_string(),
            agent_type: "outreach".to_string(),
            status: AgentStatus::Draft,
            boundary: None,
            rate_limit: RateLimitConfig::default(),
            profile_id: None,
            overrides: PolicyOverrides::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_by_id() {
        let pool = setup().await;
        let repo = SqlAgentRepository::new(pool);

        let agent = sample_agent("agent-1", "ws-1");
        repo.save(agent.clone()).await.expect("save");

        let found = repo
            .find_by_id(&AgentId("agent-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.id, agent.id);
        assert_eq!(found.status, AgentStatus::Draft);
        assert_eq!(found.rate_limit, RateLimitConfig::default());
    }

    #[tokio::test]
    async fn list_by_workspace_is_scoped() {
        let pool = setup().await;
        let repo = SqlAgentRepository::new(pool);

        repo.save(sample_agent("agent-1", "ws-1")).await.expect("save 1");
        repo.save(sample_agent("agent-2", "ws-1")).await.expect("save 2");
        repo.save(sample_agent("agent-3", "ws-2")).await.expect("save 3");

        let ws1 = repo.list_by_workspace(&WorkspaceId("ws-1".to_string())).await.expect("list");
        assert_eq!(ws1.len(), 2);
    }

    #[tokio::test]
    async fn save_upserts_status_and_overrides() {
        let pool = setup().await;
        let repo = SqlAgentRepository::new(pool);

        let mut agent = sample_agent("agent-1", "ws-1");
        repo.save(agent.clone()).await.expect("save");

        agent.status = AgentStatus::Active;
        agent.overrides.blocked_topics.push("Disciplinary record".to_string());
        repo.save(agent).await.expect("upsert");

        let found = repo
            .find_by_id(&AgentId("agent-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.status, AgentStatus::Active);
        assert_eq!(found.overrides.blocked_topics, vec!["Disciplinary record".to_string()]);
    }
}

use sqlx::Row;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::flow::{
    FlowDefinition, FlowDefinitionId, FlowDefinitionVersion, FlowEdge, FlowNode,
};
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, FlowDefinitionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowDefinitionRepository {
    pool: DbPool,
}

impl SqlFlowDefinitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_flow(row: &sqlx::sqlite::SqliteRow) -> Result<FlowDefinition, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let agent_id: String = row.try_get("agent_id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let nodes_json: String = row.try_get("nodes_json").map_err(decode_error)?;
    let edges_json: String = row.try_get("edges_json").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode_error)?;

    let nodes: Vec<FlowNode> = serde_json::from_str(&nodes_json).map_err(decode_error)?;
    let edges: Vec<FlowEdge> = serde_json::from_str(&edges_json).map_err(decode_error)?;

    Ok(FlowDefinition {
        id: FlowDefinitionId(id),
        agent_id: AgentId(agent_id),
        workspace_id: WorkspaceId(workspace_id),
        nodes,
        edges,
        version,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

fn row_to_version(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<FlowDefinitionVersion, RepositoryError> {
    let flow_id: String = row.try_get("flow_id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let snapshot_json: String = row.try_get("snapshot_json").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;

    let snapshot: FlowDefinition = serde_json::from_str(&snapshot_json).map_err(decode_error)?;

    Ok(FlowDefinitionVersion {
        flow_id: FlowDefinitionId(flow_id),
        version,
        snapshot,
        created_at: parse_datetime(&created_at_str),
    })
}

#[async_trait::async_trait]
impl FlowDefinitionRepository for SqlFlowDefinitionRepository {
    async fn find_by_id(
        &self,
        id: &FlowDefinitionId,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, workspace_id, nodes_json, edges_json, version,
                    created_at, updated_at
             FROM flow_definition WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_flow(r)?)),
            None => Ok(None),
        }
    }

    async fn list_by_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<FlowDefinition>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, agent_id, workspace_id, nodes_json, edges_json, version,
                    created_at, updated_at
             FROM flow_definition WHERE agent_id = ? ORDER BY created_at ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_flow).collect::<Result<Vec<_>, _>>()
    }

    async fn save(&self, flow: FlowDefinition) -> Result<(), RepositoryError> {
        let nodes_json = serde_json::to_string(&flow.nodes).map_err(decode_error)?;
        let edges_json = serde_json::to_string(&flow.edges).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO flow_definition (id, agent_id, workspace_id, nodes_json, edges_json,
                                          version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 nodes_json = excluded.nodes_json,
                 edges_json = excluded.edges_json,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(&flow.id.0)
        .bind(&flow.agent_id.0)
        .bind(&flow.workspace_id.0)
        .bind(&nodes_json)
        .bind(&edges_json)
        .bind(flow.version)
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_version(
        &self,
        version: FlowDefinitionVersion,
    ) -> Result<(), RepositoryError> {
        let snapshot_json = serde_json::to_string(&version.snapshot).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO flow_definition_version (flow_id, version, snapshot_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&version.flow_id.0)
        .bind(version.version)
        .bind(&snapshot_json)
        .bind(version.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_version(
        &self,
        flow_id: &FlowDefinitionId,
        version: i64,
    ) -> Result<Option<FlowDefinitionVersion>, RepositoryError> {
        let row = sqlx::query(
            "SELECT flow_id, version, snapshot_json, created_at
             FROM flow_definition_version WHERE flow_id = ? AND version = ?",
        )
        .bind(&flow_id.0)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::agent::AgentId;
    use conductor_core::domain::flow::{
        FlowDefinition, FlowDefinitionId, FlowDefinitionVersion, FlowEdge, FlowNode,
    };
    use conductor_core::domain::WorkspaceId;

    use super::SqlFlowDefinitionRepository;
    use crate::repositories::FlowDefinitionRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_flow(id: &str) -> FlowDefinition {
        let now = Utc::now();
        FlowDefinition {
            id: FlowDefinitionId(id.to_string()),
            agent_id: AgentId("agent-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            nodes: vec![
                FlowNode {
                    id: "start".to_string(),
                    kind: "trigger".to_string(),
                    label: "New record".to_string(),
                    config: serde_json::json!({}),
                },
                FlowNode {
                    id: "send".to_string(),
                    kind: "action".to_string(),
                    label: "Send message".to_string(),
                    config: serde_json::json!({"channel": "email"}),
                },
            ],
            edges: vec![FlowEdge {
                from: "start".to_string(),
                to: "send".to_string(),
                condition: None,
            }],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_graph() {
        let pool = setup().await;
        let repo = SqlFlowDefinitionRepository::new(pool);

        let flow = sample_flow("flow-1");
        repo.save(flow.clone()).await.expect("save");

        let found = repo
            .find_by_id(&FlowDefinitionId("flow-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.nodes.len(), 2);
        assert_eq!(found.edges[0].from, "start");
    }

    #[tokio::test]
    async fn versions_are_retrievable_by_number() {
        let pool = setup().await;
        let repo = SqlFlowDefinitionRepository::new(pool);

        let flow = sample_flow("flow-1");
        repo.save(flow.clone()).await.expect("save");
        repo.append_version(FlowDefinitionVersion {
            flow_id: flow.id.clone(),
            version: 1,
            snapshot: flow.clone(),
            created_at: Utc::now(),
        })
        .await
        .expect("append");

        let found = repo
            .find_version(&flow.id, 1)
            .await
            .expect("find version")
            .expect("should exist");
        assert_eq!(found.snapshot.nodes.len(), 2);
        assert!(repo.find_version(&flow.id, 9).await.expect("find missing").is_none());
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use conductor_core::config::{AppConfig, ConfigError, LoadOptions};
use conductor_db::repositories::{
    SqlAgentRepository, SqlApprovalRepository, SqlAuditLogRepository, SqlComplianceRepository,
    SqlExecutionRepository, SqlExplainabilityRepository, SqlFlowDefinitionRepository,
    SqlNarrativeProfileRepository,
};
use conductor_db::{connect, migrations, DbPool};
use conductor_engine::{
    ApprovalGate, EventBus, ExecutionControls, FlowService, NoopExecutor, Orchestrator,
    ProfileService,
};

use crate::api::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let agents = Arc::new(SqlAgentRepository::new(db_pool.clone()));
    let profiles = Arc::new(SqlNarrativeProfileRepository::new(db_pool.clone()));
    let flows = Arc::new(SqlFlowDefinitionRepository::new(db_pool.clone()));
    let executions = Arc::new(SqlExecutionRepository::new(db_pool.clone()));
    let approvals = Arc::new(SqlApprovalRepository::new(db_pool.clone()));
    let audit = Arc::new(SqlAuditLogRepository::new(db_pool.clone()));
    let compliance = Arc::new(SqlComplianceRepository::new(db_pool.clone()));
    let explainability = Arc::new(SqlExplainabilityRepository::new(db_pool.clone()));

    let bus = EventBus::default();
    let controls = ExecutionControls::default();
    let gate = ApprovalGate::new(approvals.clone(), audit.clone(), bus.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        agents.clone(),
        profiles.clone(),
        executions.clone(),
        explainability.clone(),
        compliance.clone(),
        audit.clone(),
        gate.clone(),
        controls,
        Arc::new(NoopExecutor),
        bus.clone(),
        config.execution.clone(),
        config.connectors.clone(),
    ));
    let profile_service = ProfileService::new(profiles.clone(), audit.clone(), bus.clone());
    let flow_service = FlowService::new(flows.clone(), audit.clone(), bus.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
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
    };

    Ok(Application { config, db_pool, state })
}

#[cfg(test)]
mod tests {
    use conductor_core::boundary::BoundaryClaims;
    use conductor_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use conductor_core::domain::agent::{
        Agent, AgentId, AgentStatus, PolicyOverrides, RateLimitConfig,
    };
    use conductor_core::domain::execution::{ExecutionMode, RunStatus};
    use conductor_db::repositories::AgentRepository;
    use conductor_engine::{ExecuteOutcome, ExecuteRequest};

    use crate::bootstrap::{bootstrap, bootstrap_with_config};

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations() {
        let app = bootstrap(memory_options()).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('agent', 'run', 'approval_request', 'audit_log')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query should succeed");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_database_url() {
        let result = bootstrap_with_config({
            let mut config = AppConfig::default();
            config.database.url = "sqlite:///nonexistent-dir/conductor.db".to_string();
            config
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_and_dry_run_path() {
        let app = bootstrap(memory_options()).await.expect("bootstrap should succeed");
        let state = app.state.clone();

        let now = chrono::Utc::now();
        let agent = Agent {
            id: AgentId("agent-smoke".to_string()),
            workspace_id: conductor_core::domain::WorkspaceId("ws-smoke".to_string()),
            name: "Outreach assistant".to_string(),
            role: "advisor".to_string(),
            agent_type: "outreach".to_string(),
            status: AgentStatus::Active,
            boundary: None,
            rate_limit: RateLimitConfig::default(),
            profile_id: None,
            overrides: PolicyOverrides {
                allowed_personalization_fields: vec!["first_name".to_string()],
                ..PolicyOverrides::default()
            },
            created_at: now,
            updated_at: now,
        };
        state.agents.save(agent.clone()).await.expect("agent saves");

        let claims = BoundaryClaims::new("ws-smoke", "staff-1", vec![]);
        let outcome = state
            .orchestrator
            .execute(
                &agent.id,
                &claims,
                ExecuteRequest {
                    mode: ExecutionMode::DryRun,
                    sample_targets: vec!["person-1".to_string()],
                    idempotency_key: None,
                    requested_by: "staff-1".to_string(),
                },
            )
            .await
            .expect("dry run executes");

        match outcome {
            ExecuteOutcome::Accepted { run, .. } => {
                assert_eq!(run.status, RunStatus::Completed);
                assert_eq!(run.counts.executed, 1);
            }
            ExecuteOutcome::Deduplicated { .. } => panic!("first request cannot deduplicate"),
        }

        app.db_pool.close().await;
    }
}

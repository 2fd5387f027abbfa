use sqlx::Row;

use conductor_core::domain::agent::AgentId;
use conductor_core::domain::execution::{
    ExecutionJob, ExecutionJobId, ExecutionMode, Run, RunCounts, RunId, RunStatus,
};
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, parse_datetime_opt, ExecutionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlExecutionRepository {
    pool: DbPool,
}

impl SqlExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionJob, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let agent_id: String = row.try_get("agent_id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let mode_str: String = row.try_get("mode").map_err(decode_error)?;
    let sample_targets_json: String =
        row.try_get("sample_targets_json").map_err(decode_error)?;
    let idempotency_key: Option<String> =
        row.try_get("idempotency_key").map_err(decode_error)?;
    let requested_by: String = row.try_get("requested_by").map_err(decode_error)?;
    let accepted_at_str: String = row.try_get("accepted_at").map_err(decode_error)?;

    let mode = ExecutionMode::parse(&mode_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown execution mode: {mode_str}")))?;
    let sample_targets: Vec<String> =
        serde_json::from_str(&sample_targets_json).map_err(decode_error)?;

    Ok(ExecutionJob {
        id: ExecutionJobId(id),
        agent_id: AgentId(agent_id),
        workspace_id: WorkspaceId(workspace_id),
        mode,
        sample_targets,
        idempotency_key,
        requested_by,
        accepted_at: parse_datetime(&accepted_at_str),
    })
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<Run, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let job_id: String = row.try_get("job_id").map_err(decode_error)?;
    let agent_id: String = row.try_get("agent_id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let status_str: String = row.try_get("status").map_err(decode_error)?;
    let summary: String = row.try_get("summary").map_err(decode_error)?;
    let executed: i64 = row.try_get("executed").map_err(decode_error)?;
    let approval_required: i64 = row.try_get("approval_required").map_err(decode_error)?;
    let blocked: i64 = row.try_get("blocked").map_err(decode_error)?;
    let failed: i64 = row.try_get("failed").map_err(decode_error)?;
    let started_at_str: String = row.try_get("started_at").map_err(decode_error)?;
    let finished_at_str: Option<String> = row.try_get("finished_at").map_err(decode_error)?;

    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown run status: {status_str}")))?;

    Ok(Run {
        id: RunId(id),
        job_id: ExecutionJobId(job_id),
        agent_id: AgentId(agent_id),
        workspace_id: WorkspaceId(workspace_id),
        status,
        summary,
        counts: RunCounts {
            executed: executed.max(0) as u32,
            approval_required: approval_required.max(0) as u32,
            blocked: blocked.max(0) as u32,
            failed: failed.max(0) as u32,
        },
        started_at: parse_datetime(&started_at_str),
        finished_at: parse_datetime_opt(finished_at_str),
    })
}

#[async_trait::async_trait]
impl ExecutionRepository for SqlExecutionRepository {
    async fn save_job(&self, job: ExecutionJob) -> Result<(), RepositoryError> {
        let sample_targets_json =
            serde_json::to_string(&job.sample_targets).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO execution_job (id, agent_id, workspace_id, mode, sample_targets_json,
                                        idempotency_key, requested_by, accepted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id.0)
        .bind(&job.agent_id.0)
        .bind(&job.workspace_id.0)
        .bind(job.mode.as_str())
        .bind(&sample_targets_json)
        .bind(&job.idempotency_key)
        .bind(&job.requested_by)
        .bind(job.accepted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_job_by_id(
        &self,
        id: &ExecutionJobId,
    ) -> Result<Option<ExecutionJob>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, workspace_id, mode, sample_targets_json, idempotency_key,
                    requested_by, accepted_at
             FROM execution_job WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_job(r)?)),
            None => Ok(None),
        }
    }

    async fn save_run(&self, run: Run) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO run (id, job_id, agent_id, workspace_id, status, summary,
                              executed, approval_required, blocked, failed,
                              started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 summary = excluded.summary,
                 executed = excluded.executed,
                 approval_required = excluded.approval_required,
                 blocked = excluded.blocked,
                 failed = excluded.failed,
                 finished_at = excluded.finished_at",
        )
        .bind(&run.id.0)
        .bind(&run.job_id.0)
        .bind(&run.agent_id.0)
        .bind(&run.workspace_id.0)
        .bind(run.status.as_str())
        .bind(&run.summary)
        .bind(run.counts.executed as i64)
        .bind(run.counts.approval_required as i64)
        .bind(run.counts.blocked as i64)
        .bind(run.counts.failed as i64)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_run_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, job_id, agent_id, workspace_id, status, summary,
                    executed, approval_required, blocked, failed, started_at, finished_at
             FROM run WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_run(r)?)),
            None => Ok(None),
        }
    }

    async fn find_run_by_job_id(
        &self,
        job_id: &ExecutionJobId,
    ) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, job_id, agent_id, workspace_id, status, summary,
                    executed, approval_required, blocked, failed, started_at, finished_at
             FROM run WHERE job_id = ?",
        )
        .bind(&job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_run(r)?)),
            None => Ok(None),
        }
    }

    async fn list_runs_by_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<Run>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, job_id, agent_id, workspace_id, status, summary,
                    executed, approval_required, blocked, failed, started_at, finished_at
             FROM run WHERE agent_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(&agent_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_run).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::agent::AgentId;
    use conductor_core::domain::execution::{
        ExecutionJob, ExecutionJobId, ExecutionMode, Run, RunCounts, RunId, RunStatus,
    };
    use conductor_core::domain::WorkspaceId;

    use super::SqlExecutionRepository;
    use crate::repositories::ExecutionRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_job(id: &str) -> ExecutionJob {
        ExecutionJob {
            id: ExecutionJobId(id.to_string()),
            agent_id: AgentId("agent-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            mode: ExecutionMode::DryRun,
            sample_targets: vec!["person-1".to_string(), "person-2".to_string()],
            idempotency_key: Some("key-1".to_string()),
            requested_by: "user-1".to_string(),
            accepted_at: Utc::now(),
        }
    }

    fn sample_run(id: &str, job_id: &str) -> Run {
        Run {
            id: RunId(id.to_string()),
            job_id: ExecutionJobId(job_id.to_string()),
            agent_id: AgentId("agent-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            status: RunStatus::Completed,
            summary: "2 executed".to_string(),
            counts: RunCounts { executed: 2, ..Default::default() },
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn job_round_trips_mode_and_targets() {
        let pool = setup().await;
        let repo = SqlExecutionRepository::new(pool);

        repo.save_job(sample_job("job-1")).await.expect("save job");

        let found = repo
            .find_job_by_id(&ExecutionJobId("job-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.mode, ExecutionMode::DryRun);
        assert_eq!(found.sample_targets.len(), 2);
        assert_eq!(found.idempotency_key.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn run_upsert_finalizes_counts() {
        let pool = setup().await;
        let repo = SqlExecutionRepository::new(pool);

        repo.save_job(sample_job("job-1")).await.expect("save job");

        let mut run = sample_run("run-1", "job-1");
        run.finished_at = None;
        repo.save_run(run.clone()).await.expect("save run");

        run.status = RunStatus::CompletedWithApprovals;
        run.counts = RunCounts { executed: 1, approval_required: 1, ..Default::default() };
        run.finished_at = Some(Utc::now());
        repo.save_run(run).await.expect("finalize run");

        let found = repo
            .find_run_by_id(&RunId("run-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.status, RunStatus::CompletedWithApprovals);
        assert_eq!(found.counts.approval_required, 1);
        assert!(found.finished_at.is_some());
    }

    #[tokio::test]
    async fn run_is_reachable_by_its_job_id() {
        let pool = setup().await;
        let repo = SqlExecutionRepository::new(pool);

        repo.save_job(sample_job("job-1")).await.expect("save job");
        repo.save_run(sample_run("run-1", "job-1")).await.expect("save run");

        let found = repo
            .find_run_by_job_id(&ExecutionJobId("job-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.id.0, "run-1");

        let missing = repo
            .find_run_by_job_id(&ExecutionJobId("job-9".to_string()))
            .await
            .expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn list_runs_by_agent_respects_limit() {
        let pool = setup().await;
        let repo = SqlExecutionRepository::new(pool);

        repo.save_job(sample_job("job-1")).await.expect("save job");
        for i in 0..5 {
            repo.save_run(sample_run(&format!("run-{i}"), "job-1")).await.expect("save run");
        }

        let runs = repo
            .list_runs_by_agent(&AgentId("agent-1".to_string()), 3)
            .await
            .expect("list runs");
        assert_eq!(runs.len(), 3);
    }
}

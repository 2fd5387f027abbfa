use std::collections::BTreeMap;

use sqlx::Row;

use conductor_core::domain::profile::{
    NarrativeProfile, NarrativeProfileId, NarrativeProfileVersion,
};
use conductor_core::domain::WorkspaceId;

use super::{decode_error, parse_datetime, NarrativeProfileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNarrativeProfileRepository {
    pool: DbPool,
}

impl SqlNarrativeProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<NarrativeProfile, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let tone: String = row.try_get("tone").map_err(decode_error)?;
    let allowed_topics_json: String =
        row.try_get("allowed_topics_json").map_err(decode_error)?;
    let blocked_topics_json: String =
        row.try_get("blocked_topics_json").map_err(decode_error)?;
    let fields_json: String =
        row.try_get("allowed_personalization_fields_json").map_err(decode_error)?;
    let topic_keywords_json: String =
        row.try_get("topic_keywords_json").map_err(decode_error)?;
    let escalation_message: String =
        row.try_get("escalation_message").map_err(decode_error)?;
    let boundary: Option<String> = row.try_get("boundary").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode_error)?;

    let allowed_topics: Vec<String> =
        serde_json::from_str(&allowed_topics_json).map_err(decode_error)?;
    let blocked_topics: Vec<String> =
        serde_json::from_str(&blocked_topics_json).map_err(decode_error)?;
    let allowed_personalization_fields: Vec<String> =
        serde_json::from_str(&fields_json).map_err(decode_error)?;
    let topic_keywords: BTreeMap<String, Vec<String>> =
        serde_json::from_str(&topic_keywords_json).map_err(decode_error)?;

    Ok(NarrativeProfile {
        id: NarrativeProfileId(id),
        workspace_id: WorkspaceId(workspace_id),
        name,
        tone,
        allowed_topics,
        blocked_topics,
        allowed_personalization_fields,
        topic_keywords,
        escalation_message,
        boundary,
        version,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

fn row_to_version(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<NarrativeProfileVersion, RepositoryError> {
    let profile_id: String = row.try_get("profile_id").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let snapshot_json: String = row.try_get("snapshot_json").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;

    let snapshot: NarrativeProfile =
        serde_json::from_str(&snapshot_json).map_err(decode_error)?;

    Ok(NarrativeProfileVersion {
        profile_id: NarrativeProfileId(profile_id),
        version,
        snapshot,
        created_at: parse_datetime(&created_at_str),
    })
}

#[async_trait::async_trait]
impl NarrativeProfileRepository for SqlNarrativeProfileRepository {
    async fn find_by_id(
        &self,
        id: &NarrativeProfileId,
    ) -> Result<Option<NarrativeProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, name, tone, allowed_topics_json, blocked_topics_json,
                    allowed_personalization_fields_json, topic_keywords_json,
                    escalation_message, boundary, version, created_at, updated_at
             FROM narrative_profile WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_profile(r)?)),
            None => Ok(None),
        }
    }

    async fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<NarrativeProfile>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT id, workspace_id, name, tone, allowed_topics_json, blocked_topics_json,
                    allowed_personalization_fields_json, topic_keywords_json,
                    escalation_message, boundary, version, created_at, updated_at
             FROM narrative_profile WHERE workspace_id = ? ORDER BY created_at ASC",
        )
        .bind(&workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_profile).collect::<Result<Vec<_>, _>>()
    }

    async fn save(&self, profile: NarrativeProfile) -> Result<(), RepositoryError> {
        let allowed_topics_json =
            serde_json::to_string(&profile.allowed_topics).map_err(decode_error)?;
        let blocked_topics_json =
            serde_json::to_string(&profile.blocked_topics).map_err(decode_error)?;
        let fields_json = serde_json::to_string(&profile.allowed_personalization_fields)
            .map_err(decode_error)?;
        let topic_keywords_json =
            serde_json::to_string(&profile.topic_keywords).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO narrative_profile (id, workspace_id, name, tone,
                                            allowed_topics_json, blocked_topics_json,
                                            allowed_personalization_fields_json,
                                            topic_keywords_json, escalation_message,
                                            boundary, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 tone = excluded.tone,
                 allowed_topics_json = excluded.allowed_topics_json,
                 blocked_topics_json = excluded.blocked_topics_json,
                 allowed_personalization_fields_json = excluded.allowed_personalization_fields_json,
                 topic_keywords_json = excluded.topic_keywords_json,
                 escalation_message = excluded.escalation_message,
                 boundary = excluded.boundary,
                 version = excluded.version,
                 updated_at = excluded.updated_at",
        )
        .bind(&profile.id.0)
        .bind(&profile.workspace_id.0)
        .bind(&profile.name)
        .bind(&profile.tone)
        .bind(&allowed_topics_json)
        .bind(&blocked_topics_json)
        .bind(&fields_json)
        .bind(&topic_keywords_json)
        .bind(&profile.escalation_message)
        .bind(&profile.boundary)
        .bind(profile.version)
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_version(
        &self,
        version: NarrativeProfileVersion,
    ) -> Result<(), RepositoryError> {
        let snapshot_json = serde_json::to_string(&version.snapshot).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO narrative_profile_version (profile_id, version, snapshot_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&version.profile_id.0)
        .bind(version.version)
        .bind(&snapshot_json)
        .bind(version.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_version(
        &self,
        profile_id: &NarrativeProfileId,
        version: i64,
    ) -> Result<Option<NarrativeProfileVersion>, RepositoryError> {
        let row = sqlx::query(
            "SELECT profile_id, version, snapshot_json, created_at
             FROM narrative_profile_version WHERE profile_id = ? AND version = ?",
        )
        .bind(&profile_id.0)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_version(r)?)),
            None => Ok(None),
        }
    }

    async fn list_versions(
        &self,
        profile_id: &NarrativeProfileId,
    ) -> Result<Vec<NarrativeProfileVersion>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT profile_id, version, snapshot_json, created_at
             FROM narrative_profile_version WHERE profile_id = ? ORDER BY version ASC",
        )
        .bind(&profile_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_version).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use conductor_core::domain::profile::{
        NarrativeProfile, NarrativeProfileId, NarrativeProfileVersion,
    };
    use conductor_core::domain::WorkspaceId;

    use super::SqlNarrativeProfileRepository;
    use crate::repositories::NarrativeProfileRepository;
    use crate::{connect_memory, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_memory("sqlite::memory:").await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_profile(id: &str) -> NarrativeProfile {
        let now = Utc::now();
        NarrativeProfile {
            id: NarrativeProfileId(id.to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            name: "Default advisor voice".to_string(),
            tone: "warm".to_string(),
            allowed_topics: vec!["Course planning".to_string()],
            blocked_topics: vec!["Disciplinary record".to_string()],
            allowed_personalization_fields: vec!["first_name".to_string()],
            topic_keywords: Default::default(),
            escalation_message: "Please contact your advisor directly.".to_string(),
            boundary: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_policy_lists() {
        let pool = setup().await;
        let repo = SqlNarrativeProfileRepository::new(pool);

        let profile = sample_profile("np-1");
        repo.save(profile.clone()).await.expect("save");

        let found = repo
            .find_by_id(&NarrativeProfileId("np-1".to_string()))
            .await
            .expect("find")
            .expect("should exist");
        assert_eq!(found.allowed_topics, profile.allowed_topics);
        assert_eq!(found.blocked_topics, profile.blocked_topics);
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn versions_append_and_read_back_in_order() {
        let pool = setup().await;
        let repo = SqlNarrativeProfileRepository::new(pool);

        let profile = sample_profile("np-1");
        repo.save(profile.clone()).await.expect("save");

        for v in 1..=3 {
            let mut snapshot = profile.clone();
            snapshot.version = v;
            repo.append_version(NarrativeProfileVersion {
                profile_id: profile.id.clone(),
                version: v,
                snapshot,
                created_at: Utc::now(),
            })
            .await
            .expect("append version");
        }

        let versions = repo.list_versions(&profile.id).await.expect("list versions");
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[2].version, 3);

        let second = repo
            .find_version(&profile.id, 2)
            .await
            .expect("find version")
            .expect("should exist");
        assert_eq!(second.snapshot.version, 2);
    }

    #[tokio::test]
    async fn duplicate_version_append_is_rejected() {
        let pool = setup().await;
        let repo = SqlNarrativeProfileRepository::new(pool);

        let profile = sample_profile("np-1");
        repo.save(profile.clone()).await.expect("save");

        let version = NarrativeProfileVersion {
            profile_id: profile.id.clone(),
            version: 1,
            snapshot: profile,
            created_at: Utc::now(),
        };
        repo.append_version(version.clone()).await.expect("first append");
        assert!(repo.append_version(version).await.is_err());
    }
}

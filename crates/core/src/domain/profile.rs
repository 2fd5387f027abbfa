use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::WorkspaceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NarrativeProfileId(pub String);

/// Workspace-scoped policy document governing what an agent may say and
/// which personalization fields it may use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeProfile {
    pub id: NarrativeProfileId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub tone: String,
    pub allowed_topics: Vec<String>,
    pub blocked_topics: Vec<String>,
    pub allowed_personalization_fields: Vec<String>,
    /// Extra detection keywords per topic name, merged with the built-in
    /// lexicon at evaluation time.
    #[serde(default)]
    pub topic_keywords: BTreeMap<String, Vec<String>>,
    pub escalation_message: String,
    pub boundary: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of the profile state that was live immediately
/// before the next version was written. Versions are only appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeProfileVersion {
    pub profile_id: NarrativeProfileId,
    pub version: i64,
    pub snapshot: NarrativeProfile,
    pub created_at: DateTime<Utc>,
}

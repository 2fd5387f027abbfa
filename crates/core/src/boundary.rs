//! Fine-grained scope checks, evaluated independently of coarse
//! permission checks. Permission says "may call this endpoint at all";
//! boundary says "may touch this specific scoped entity".

use serde::{Deserialize, Serialize};

use crate::domain::WorkspaceId;

/// The caller's resolved scoping claims, produced by the external
/// identity collaborator and consumed read-only here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryClaims {
    pub workspace_id: WorkspaceId,
    pub actor_id: String,
    pub scopes: Vec<String>,
}

impl BoundaryClaims {
    pub fn new(
        workspace_id: impl Into<String>,
        actor_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            workspace_id: WorkspaceId(workspace_id.into()),
            actor_id: actor_id.into(),
            scopes,
        }
    }

    fn has_scope(&self, boundary: &str) -> bool {
        let boundary = normalize_key(boundary);
        self.scopes.iter().map(|scope| normalize_key(scope)).any(|scope| scope == boundary)
    }
}

/// Access is granted iff the entity carries no boundary restriction or
/// the caller's claims include a matching scope.
pub fn can_access_with_boundary(claims: &BoundaryClaims, entity_boundary: Option<&str>) -> bool {
    match entity_boundary {
        None => true,
        Some(boundary) if boundary.trim().is_empty() => true,
        Some(boundary) => claims.has_scope(boundary),
    }
}

/// Same boundary rule plus an allowlist check for the specific external
/// endpoints a connector may call.
pub fn connector_allowed_for_boundary(
    connector_endpoint: &str,
    connector_boundary: Option<&str>,
    claims: &BoundaryClaims,
    allowed_endpoints: &[String],
) -> bool {
    if !can_access_with_boundary(claims, connector_boundary) {
        return false;
    }

    let endpoint = normalize_key(connector_endpoint);
    allowed_endpoints.iter().map(|allowed| normalize_key(allowed)).any(|allowed| allowed == endpoint)
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

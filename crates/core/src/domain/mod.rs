use serde::{Deserialize, Serialize};

pub mod agent;
pub mod approval;
pub mod compliance;
pub mod execution;
pub mod explain;
pub mod flow;
pub mod profile;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

use thiserror::Error;

use crate::domain::agent::AgentStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid agent transition from {from:?} to {to:?}")]
    InvalidAgentTransition { from: AgentStatus, to: AgentStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Application-level failure taxonomy. Every variant maps to exactly one
/// HTTP class at the interface layer, and every variant carries a short
/// machine-readable reason via [`ApplicationError::reason`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("boundary denied: {0}")]
    BoundaryDenied(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("concurrent run limit reached for {0}")]
    ConcurrencyConflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn persist(source: impl std::fmt::Display) -> Self {
        Self::Persistence(source.to_string())
    }

    /// Short machine-readable reason string returned in error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Domain(_) | Self::Validation(_) => "validation_failed",
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::BoundaryDenied(_) => "boundary_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::Persistence(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller should retry with backoff. Rate and concurrency
    /// rejections are expected operating conditions, not faults.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ConcurrencyConflict(_))
    }
}

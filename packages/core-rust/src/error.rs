//! Error taxonomy shared by the router, saga orchestrator and query engine.

use serde::{Deserialize, Serialize};

/// Result alias used across the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure classes surfaced to callers of the gateway.
///
/// `NotFound`, `Conflict` and `ValidationFailed` are detected before any
/// partition is mutated. `PartitionUnavailable` may occur at any point;
/// during a saga it triggers compensation. `CompensationFailed` is the only
/// class that may leave partitions in an acknowledged inconsistent state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{what} already exists")]
    Conflict { what: String },

    #[error("partition {partition} unavailable: {reason}")]
    PartitionUnavailable { partition: String, reason: String },

    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("compensation on partition {partition} failed: {reason}")]
    CompensationFailed { partition: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict { what: what.into() }
    }

    pub fn unavailable(partition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PartitionUnavailable {
            partition: partition.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }

    /// The taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::PartitionUnavailable { .. } => ErrorKind::PartitionUnavailable,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::CompensationFailed { .. } => ErrorKind::CompensationFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Serializable error class carried in an
/// [`OperationResult`](crate::saga::OperationResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PartitionUnavailable,
    ValidationFailed,
    CompensationFailed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = GatewayError::unavailable("site-6", "connection refused");
        assert_eq!(
            err.to_string(),
            "partition site-6 unavailable: connection refused"
        );
        assert_eq!(err.kind(), ErrorKind::PartitionUnavailable);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CompensationFailed).unwrap();
        assert_eq!(json, "\"compensation_failed\"");
    }
}

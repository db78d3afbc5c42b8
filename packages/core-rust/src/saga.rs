//! Saga transaction records and the result contract returned to callers.
//!
//! A [`SagaTransaction`] is created when a multi-partition write starts,
//! appended to as partition calls are attempted (forward steps and
//! compensations alike, in real order) and frozen once handed back inside an
//! [`OperationResult`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{ErrorKind, GatewayError};
use crate::partition::{PartitionDef, PartitionId};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// Status and step records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SagaStatus {
    Initiated,
    Committed,
    RolledBack,
    Failed,
    /// Failed, but a completed step was deliberately kept instead of undone.
    PartialSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Delete => "Delete",
        })
    }
}

/// One attempted partition call within a saga.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteOperation {
    pub partition_id: PartitionId,
    pub partition_name: String,
    pub operation: MutationKind,
    pub compensating: bool,
    pub success: bool,
    pub error: Option<String>,
    pub executed_at_ms: u64,
}

impl SiteOperation {
    pub fn new(
        partition: &PartitionDef,
        operation: MutationKind,
        compensating: bool,
        outcome: Result<(), &GatewayError>,
    ) -> Self {
        Self {
            partition_id: partition.id,
            partition_name: partition.name.clone(),
            operation,
            compensating,
            success: outcome.is_ok(),
            error: outcome.err().map(ToString::to_string),
            executed_at_ms: now_millis(),
        }
    }

    /// `Insert`, `Delete (Compensating)`, ...
    #[must_use]
    pub fn label(&self) -> String {
        if self.compensating {
            format!("{} (Compensating)", self.operation)
        } else {
            self.operation.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// SagaTransaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaTransaction {
    pub id: String,
    pub name: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub status: SagaStatus,
    pub steps: Vec<SiteOperation>,
}

impl SagaTransaction {
    pub fn begin(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            started_at_ms: now_millis(),
            ended_at_ms: None,
            status: SagaStatus::Initiated,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: SiteOperation) {
        self.steps.push(step);
    }

    pub fn finish(&mut self, status: SagaStatus) {
        self.status = status;
        self.ended_at_ms = Some(now_millis());
    }

    #[must_use]
    pub fn forward_steps(&self) -> usize {
        self.steps.iter().filter(|s| !s.compensating).count()
    }
}

// ---------------------------------------------------------------------------
// OperationResult
// ---------------------------------------------------------------------------

/// Outcome of a gateway write, with the saga trace when one ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorKind>,
    pub transaction: Option<SagaTransaction>,
}

impl<T> OperationResult<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            warnings: Vec::new(),
            error: None,
            transaction: None,
        }
    }

    /// A failure detected before any partition was mutated.
    #[must_use]
    pub fn rejected(err: &GatewayError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            data: None,
            warnings: Vec::new(),
            error: Some(err.kind()),
            transaction: None,
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            success: self.success,
            message: self.message,
            data: self.data.map(f),
            warnings: self.warnings,
            error: self.error,
            transaction: self.transaction,
        }
    }
}

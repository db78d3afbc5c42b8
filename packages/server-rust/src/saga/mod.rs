//! Multi-partition writes as explicit step lists.
//!
//! A [`SagaPlan`] is data: guards checked before anything is written, then
//! ordered [`SagaStep`]s, each a tagged [`Mutation`] against one partition
//! plus the [`Compensation`] to run if a later step fails. The
//! [`SagaOrchestrator`] interprets a plan and returns a [`SagaReport`]; it
//! never panics or throws, so the full step trace is always available.

pub mod orchestrator;
pub mod plans;

use fragdb_core::{
    GatewayError, LogicalTable, MutationKind, OperationResult, PartitionId, Row, RowKey,
    SagaStatus, SagaTransaction,
};

pub use orchestrator::SagaOrchestrator;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A single-row write. `Update` replaces the stored row wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Row),
    Update(Row),
    Delete(RowKey),
}

impl Mutation {
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Insert(_) => MutationKind::Insert,
            Self::Update(_) => MutationKind::Update,
            Self::Delete(_) => MutationKind::Delete,
        }
    }

    #[must_use]
    pub fn table(&self) -> LogicalTable {
        match self {
            Self::Insert(row) | Self::Update(row) => row.table(),
            Self::Delete(key) => key.table(),
        }
    }
}

/// What to do about a completed step once a later step fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    /// Nothing to undo.
    None,
    /// Run this mutation against the step's partition.
    Apply(Mutation),
    /// Deliberately keep the step's effect and tell the caller.
    Retain { warning: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SagaStep {
    pub partition: PartitionId,
    pub mutation: Mutation,
    pub compensation: Compensation,
}

impl SagaStep {
    #[must_use]
    pub fn new(partition: PartitionId, mutation: Mutation) -> Self {
        Self {
            partition,
            mutation,
            compensation: Compensation::None,
        }
    }

    #[must_use]
    pub fn undo_with(mut self, undo: Mutation) -> Self {
        self.compensation = Compensation::Apply(undo);
        self
    }

    #[must_use]
    pub fn retain_on_failure(mut self, warning: impl Into<String>) -> Self {
        self.compensation = Compensation::Retain {
            warning: warning.into(),
        };
        self
    }
}

/// Precondition on a key, checked before the first step.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Absent { partition: PartitionId, key: RowKey },
    Present { partition: PartitionId, key: RowKey },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SagaPlan {
    pub name: &'static str,
    pub guards: Vec<Guard>,
    pub steps: Vec<SagaStep>,
}

impl SagaPlan {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            guards: Vec::new(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn require_absent(mut self, partition: PartitionId, key: RowKey) -> Self {
        self.guards.push(Guard::Absent { partition, key });
        self
    }

    #[must_use]
    pub fn require_present(mut self, partition: PartitionId, key: RowKey) -> Self {
        self.guards.push(Guard::Present { partition, key });
        self
    }

    #[must_use]
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Terminal state of one saga run.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub transaction: SagaTransaction,
    /// The error that stopped the saga, if it did not commit.
    pub failure: Option<GatewayError>,
    pub warnings: Vec<String>,
    pub compensation_failed: bool,
}

impl SagaReport {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.transaction.status == SagaStatus::Committed
    }

    /// Maps the report onto the caller-facing result contract.
    ///
    /// Only `Committed` is a success. A failed compensation is reported as
    /// `CompensationFailed` whatever stopped the saga.
    pub fn into_result<T>(self, message: impl Into<String>, data: T) -> OperationResult<T> {
        let committed = self.is_committed();
        let (message, error) = match &self.failure {
            _ if committed => (message.into(), None),
            Some(err) => {
                let kind = if self.compensation_failed {
                    fragdb_core::ErrorKind::CompensationFailed
                } else {
                    err.kind()
                };
                (format!("{} failed: {err}", self.transaction.name), Some(kind))
            }
            None => (format!("{} did not commit", self.transaction.name), None),
        };
        OperationResult {
            success: committed,
            message,
            data: committed.then_some(data),
            warnings: self.warnings,
            error,
            transaction: Some(self.transaction),
        }
    }
}

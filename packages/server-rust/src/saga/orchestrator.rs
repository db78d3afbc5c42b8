//! Saga interpreter.
//!
//! Steps run strictly in order. On the first failed step every previously
//! completed step is compensated in reverse order, once, without retry. A
//! failed compensation is recorded, logged as critical and surfaced as a
//! warning.
//!
//! Cancellation: the caller's token governs guards and the first step. Once a
//! step has written something, no further forward step is issued after the
//! caller cancels, and compensations run on a detached token so the saga
//! always reaches a terminal state.

use std::sync::Arc;

use fragdb_core::{
    Entity, GatewayError, GatewayResult, LogicalTable, PartitionDef, PartitionId, RowKey,
    SagaStatus, SagaTransaction, SiteOperation,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Compensation, Guard, Mutation, SagaPlan, SagaReport};
use crate::registry::{PartitionRegistry, Site, TableSites};

/// Executes [`SagaPlan`]s against the partitions of a registry.
#[derive(Clone)]
pub struct SagaOrchestrator {
    registry: Arc<PartitionRegistry>,
}

impl SagaOrchestrator {
    #[must_use]
    pub fn new(registry: Arc<PartitionRegistry>) -> Self {
        Self { registry }
    }

    /// Runs `plan` to a terminal state.
    pub async fn run(&self, plan: SagaPlan, cancel: &CancellationToken) -> SagaReport {
        let mut tx = SagaTransaction::begin(Uuid::new_v4().to_string(), plan.name);
        tracing::info!(saga = plan.name, tx = %tx.id, steps = plan.steps.len(), "saga started");

        let defs = match self.preflight(&plan, cancel).await {
            Ok(defs) => defs,
            Err(err) => {
                tx.finish(SagaStatus::Failed);
                tracing::warn!(saga = plan.name, tx = %tx.id, error = %err, "saga rejected before any step");
                return SagaReport {
                    transaction: tx,
                    failure: Some(err),
                    warnings: Vec::new(),
                    compensation_failed: false,
                };
            }
        };

        let detached = CancellationToken::new();
        let mut completed: Vec<usize> = Vec::new();
        let mut failure = None;

        for (idx, step) in plan.steps.iter().enumerate() {
            let token = if completed.is_empty() {
                cancel
            } else if cancel.is_cancelled() {
                failure = Some(GatewayError::Cancelled);
                break;
            } else {
                &detached
            };

            let outcome = self.apply(step.partition, &step.mutation, token).await;
            tx.record(SiteOperation::new(
                defs[idx],
                step.mutation.kind(),
                false,
                outcome.as_ref().map(|_| ()),
            ));
            match outcome {
                Ok(()) => completed.push(idx),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let Some(err) = failure else {
            tx.finish(SagaStatus::Committed);
            tracing::info!(saga = plan.name, tx = %tx.id, "saga committed");
            return SagaReport {
                transaction: tx,
                failure: None,
                warnings: Vec::new(),
                compensation_failed: false,
            };
        };

        tracing::warn!(
            saga = plan.name,
            tx = %tx.id,
            error = %err,
            completed = completed.len(),
            "saga step failed, compensating"
        );

        let mut warnings = Vec::new();
        let mut retained = false;
        let mut compensation_failed = false;
        for &idx in completed.iter().rev() {
            let step = &plan.steps[idx];
            match &step.compensation {
                Compensation::None => {}
                Compensation::Retain { warning } => {
                    retained = true;
                    tracing::warn!(saga = plan.name, tx = %tx.id, partition = %defs[idx], "completed step retained");
                    warnings.push(warning.clone());
                }
                Compensation::Apply(undo) => {
                    let outcome = self.apply(step.partition, undo, &detached).await;
                    tx.record(SiteOperation::new(
                        defs[idx],
                        undo.kind(),
                        true,
                        outcome.as_ref().map(|_| ()),
                    ));
                    if let Err(undo_err) = outcome {
                        compensation_failed = true;
                        tracing::error!(
                            critical = true,
                            saga = plan.name,
                            tx = %tx.id,
                            partition = %defs[idx],
                            error = %undo_err,
                            "compensation failed, partitions left inconsistent"
                        );
                        warnings.push(format!(
                            "{} compensation on {} failed ({undo_err}); data may be inconsistent and needs manual reconciliation",
                            undo.kind(),
                            defs[idx]
                        ));
                    }
                }
            }
        }

        tx.finish(if retained {
            SagaStatus::PartialSuccess
        } else {
            SagaStatus::RolledBack
        });
        tracing::warn!(saga = plan.name, tx = %tx.id, status = ?tx.status, "saga did not commit");

        SagaReport {
            transaction: tx,
            failure: Some(err),
            warnings,
            compensation_failed,
        }
    }

    /// Resolves every step's partition and checks guards.
    async fn preflight<'p>(
        &'p self,
        plan: &SagaPlan,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<&'p PartitionDef>> {
        let defs = plan
            .steps
            .iter()
            .map(|step| {
                self.registry.partition(step.partition).ok_or_else(|| {
                    GatewayError::validation(format!("unknown partition {}", step.partition))
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        for guard in &plan.guards {
            match guard {
                Guard::Absent { partition, key } => {
                    if self.exists(*partition, key, cancel).await? {
                        return Err(GatewayError::conflict(format!(
                            "{key} on partition {partition}"
                        )));
                    }
                }
                Guard::Present { partition, key } => {
                    if !self.exists(*partition, key, cancel).await? {
                        return Err(GatewayError::not_found(format!(
                            "{key} on partition {partition}"
                        )));
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        Ok(defs)
    }

    async fn exists(
        &self,
        partition: PartitionId,
        key: &RowKey,
        cancel: &CancellationToken,
    ) -> GatewayResult<bool> {
        match key.clone() {
            RowKey::Class(k) => holds_key(self.registry.classes(), partition, &k, cancel).await,
            RowKey::Student(k) => holds_key(self.registry.students(), partition, &k, cancel).await,
            RowKey::ScoreStage1(k) => holds_key(self.registry.stage1(), partition, &k, cancel).await,
            RowKey::ScoreStage23(k) => holds_key(self.registry.stage23(), partition, &k, cancel).await,
        }
    }

    async fn apply(
        &self,
        partition: PartitionId,
        mutation: &Mutation,
        cancel: &CancellationToken,
    ) -> GatewayResult<()> {
        let mutation = mutation.clone();
        match mutation.table() {
            LogicalTable::Class => apply_to(self.registry.classes(), partition, mutation, cancel).await,
            LogicalTable::Student => apply_to(self.registry.students(), partition, mutation, cancel).await,
            LogicalTable::ScoreStage1 => apply_to(self.registry.stage1(), partition, mutation, cancel).await,
            LogicalTable::ScoreStage23 => apply_to(self.registry.stage23(), partition, mutation, cancel).await,
        }
    }
}

fn site_of<E: Entity>(sites: &TableSites<E>, partition: PartitionId) -> GatewayResult<&Site<E>> {
    sites.get(partition).ok_or_else(|| {
        GatewayError::validation(format!("partition {partition} does not serve {}", E::TABLE))
    })
}

async fn holds_key<E: Entity>(
    sites: &TableSites<E>,
    partition: PartitionId,
    key: &E::Key,
    cancel: &CancellationToken,
) -> GatewayResult<bool> {
    let site = site_of(sites, partition)?;
    site.store()
        .get(key, cancel)
        .await
        .map(|hit| hit.is_some())
        .map_err(|err| err.at(site.def()))
}

async fn apply_to<E: Entity>(
    sites: &TableSites<E>,
    partition: PartitionId,
    mutation: Mutation,
    cancel: &CancellationToken,
) -> GatewayResult<()> {
    let site = site_of(sites, partition)?;
    let mismatch = || GatewayError::validation(format!("row routed to {} partition {partition}", E::TABLE));
    let outcome = match mutation {
        Mutation::Insert(row) => {
            let record = E::from_row(row).ok_or_else(mismatch)?;
            site.store().insert(record, cancel).await
        }
        Mutation::Update(row) => {
            let record = E::from_row(row).ok_or_else(mismatch)?;
            let key = record.key();
            site.store()
                .update(&key, Box::new(move |current| *current = record), cancel)
                .await
                .map(drop)
        }
        Mutation::Delete(key) => {
            let key = E::from_row_key(key).ok_or_else(mismatch)?;
            site.store().delete(&key, cancel).await.map(drop)
        }
    };
    outcome.map_err(|err| err.at(site.def()))
}

#[cfg(test)]
mod tests {
    use fragdb_core::{Entity, ErrorKind, MutationKind, Stage1Score};

    use super::*;
    use crate::saga::SagaStep;
    use crate::testing::{stage1, Fault, Harness};

    const STAGE1: PartitionId = PartitionId(5);

    fn insert_stage1(score: &Stage1Score) -> SagaStep {
        SagaStep::new(STAGE1, Mutation::Insert(score.clone().into_row()))
            .undo_with(Mutation::Delete(Stage1Score::row_key(score.key())))
    }

    #[tokio::test]
    async fn commits_when_every_step_succeeds() {
        let harness = Harness::empty();
        let a = stage1("SV001", "M01", Some(7.0));
        let b = stage1("SV001", "M02", Some(8.0));
        let plan = SagaPlan::new("pair").step(insert_stage1(&a)).step(insert_stage1(&b));

        let report = harness.sagas().run(plan, &CancellationToken::new()).await;
        assert!(report.is_committed());
        assert_eq!(report.transaction.steps.len(), 2);
        assert!(report.transaction.ended_at_ms.is_some());
        assert!(harness.stage1_at(STAGE1, "SV001", "M02").await.is_some());
    }

    #[tokio::test]
    async fn guard_violation_runs_no_step() {
        let harness = Harness::seeded().await;
        let existing = stage1("SV001", "M01", Some(1.0));
        let plan = SagaPlan::new("dup")
            .require_absent(STAGE1, Stage1Score::row_key(existing.key()))
            .step(insert_stage1(&existing));

        let report = harness.sagas().run(plan, &CancellationToken::new()).await;
        assert_eq!(report.transaction.status, SagaStatus::Failed);
        assert!(report.transaction.steps.is_empty());
        assert!(matches!(report.failure, Some(GatewayError::Conflict { .. })));
    }

    #[tokio::test]
    async fn failed_first_step_rolls_back_with_nothing_to_undo() {
        let harness = Harness::empty();
        harness.fail(STAGE1, Fault::Insert);
        let plan = SagaPlan::new("one").step(insert_stage1(&stage1("SV001", "M01", None)));

        let report = harness.sagas().run(plan, &CancellationToken::new()).await;
        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        assert_eq!(report.transaction.steps.len(), 1);
        assert!(!report.transaction.steps[0].success);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn compensations_run_in_reverse_order() {
        let harness = Harness::empty();
        let a = stage1("SV001", "M01", None);
        let b = stage1("SV002", "M01", None);
        let c = stage1("SV003", "M01", None);
        let plan = SagaPlan::new("three")
            .step(insert_stage1(&a))
            .step(insert_stage1(&b))
            // Duplicate of the first insert: fails on the partition itself.
            .step(SagaStep::new(STAGE1, Mutation::Insert(a.clone().into_row())))
            .step(insert_stage1(&c));

        let report = harness.sagas().run(plan, &CancellationToken::new()).await;
        let trace: Vec<(String, bool)> = report
            .transaction
            .steps
            .iter()
            .map(|s| (s.label(), s.success))
            .collect();
        assert_eq!(
            trace,
            vec![
                ("Insert".to_string(), true),
                ("Insert".to_string(), true),
                ("Insert".to_string(), false),
                ("Delete (Compensating)".to_string(), true),
                ("Delete (Compensating)".to_string(), true),
            ]
        );
        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        assert!(matches!(report.failure, Some(GatewayError::Conflict { .. })));
        assert!(harness.stage1_at(STAGE1, "SV001", "M01").await.is_none());
        assert!(harness.stage1_at(STAGE1, "SV002", "M01").await.is_none());
    }

    #[tokio::test]
    async fn cancellation_before_first_step_writes_nothing() {
        let harness = Harness::empty();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plan = SagaPlan::new("cancelled").step(insert_stage1(&stage1("SV001", "M01", None)));

        let report = harness.sagas().run(plan, &cancel).await;
        assert_eq!(report.transaction.status, SagaStatus::Failed);
        assert!(report.transaction.steps.is_empty());
        assert_eq!(report.failure, Some(GatewayError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_after_first_step_compensates() {
        let harness = Harness::empty();
        let cancel = CancellationToken::new();
        harness.cancel_after_insert(STAGE1, cancel.clone());

        let plan = SagaPlan::new("interrupted")
            .step(insert_stage1(&stage1("SV001", "M01", None)))
            .step(insert_stage1(&stage1("SV002", "M01", None)));
        let report = harness.sagas().run(plan, &cancel).await;

        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        assert_eq!(report.failure, Some(GatewayError::Cancelled));
        let kinds: Vec<_> = report
            .transaction
            .steps
            .iter()
            .map(|s| (s.operation, s.compensating, s.success))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MutationKind::Insert, false, true),
                (MutationKind::Delete, true, true),
            ]
        );
        assert!(harness.stage1_at(STAGE1, "SV001", "M01").await.is_none());
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected_up_front() {
        let harness = Harness::empty();
        let plan = SagaPlan::new("nowhere").step(SagaStep::new(
            PartitionId(42),
            Mutation::Insert(stage1("SV001", "M01", None).into_row()),
        ));
        let report = harness.sagas().run(plan, &CancellationToken::new()).await;
        assert_eq!(report.transaction.status, SagaStatus::Failed);
        assert!(report.transaction.steps.is_empty());
    }

    #[tokio::test]
    async fn row_for_wrong_table_fails_the_step() {
        let harness = Harness::empty();
        // Stage-1 row sent to a stage-2/3 partition.
        let plan = SagaPlan::new("misrouted").step(SagaStep::new(
            PartitionId(6),
            Mutation::Insert(stage1("SV001", "M01", None).into_row()),
        ));
        let result = harness
            .sagas()
            .run(plan, &CancellationToken::new())
            .await
            .into_result("ok", ());
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ValidationFailed));
    }
}

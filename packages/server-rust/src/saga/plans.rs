//! Saga plans used by the gateway services.

use fragdb_core::{Entity, PartitionDef, PartitionId, Stage1Score, Stage23Score};

use super::{Mutation, SagaPlan, SagaStep};

/// Single insert, guarded by the key being absent on the target partition.
pub fn insert_record<E: Entity>(name: &'static str, partition: PartitionId, record: E) -> SagaPlan {
    SagaPlan::new(name)
        .require_absent(partition, E::row_key(record.key()))
        .step(SagaStep::new(partition, Mutation::Insert(record.into_row())))
}

/// Single whole-row replacement, guarded by the key being present.
pub fn update_record<E: Entity>(name: &'static str, partition: PartitionId, record: E) -> SagaPlan {
    SagaPlan::new(name)
        .require_present(partition, E::row_key(record.key()))
        .step(SagaStep::new(partition, Mutation::Update(record.into_row())))
}

/// Single delete, guarded by the key being present.
pub fn delete_record<E: Entity>(name: &'static str, partition: PartitionId, key: E::Key) -> SagaPlan {
    SagaPlan::new(name)
        .require_present(partition, E::row_key(key.clone()))
        .step(SagaStep::new(partition, Mutation::Delete(E::row_key(key))))
}

/// Insert stage-1, then stage-2/3. A stage-2/3 failure deletes the stage-1 row.
#[must_use]
pub fn create_registration(
    stage1_partition: PartitionId,
    stage23_partition: PartitionId,
    stage1: Stage1Score,
    stage23: Stage23Score,
) -> SagaPlan {
    let stage1_key = Stage1Score::row_key(stage1.key());
    SagaPlan::new("create-registration")
        .require_absent(stage1_partition, stage1_key.clone())
        .require_absent(stage23_partition, Stage23Score::row_key(stage23.key()))
        .step(
            SagaStep::new(stage1_partition, Mutation::Insert(stage1.into_row()))
                .undo_with(Mutation::Delete(stage1_key)),
        )
        .step(SagaStep::new(stage23_partition, Mutation::Insert(stage23.into_row())))
}

/// How the stage-2/3 half of a score update is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage23Change {
    Update { before: Stage23Score, after: Stage23Score },
    /// No stage-2/3 row existed yet.
    Insert(Stage23Score),
}

/// Update stage-1 if requested, then stage-2/3 if requested.
///
/// Every step carries the snapshot taken before the saga to restore on
/// rollback. The stage-1 row must exist.
#[must_use]
pub fn update_scores(
    stage1_partition: PartitionId,
    stage1_snapshot: &Stage1Score,
    stage1_after: Option<Stage1Score>,
    stage23_partition: PartitionId,
    stage23: Option<Stage23Change>,
) -> SagaPlan {
    let mut plan = SagaPlan::new("update-scores")
        .require_present(stage1_partition, Stage1Score::row_key(stage1_snapshot.key()));

    if let Some(after) = stage1_after {
        plan = plan.step(
            SagaStep::new(stage1_partition, Mutation::Update(after.into_row()))
                .undo_with(Mutation::Update(stage1_snapshot.clone().into_row())),
        );
    }
    match stage23 {
        Some(Stage23Change::Update { before, after }) => {
            plan = plan.step(
                SagaStep::new(stage23_partition, Mutation::Update(after.into_row()))
                    .undo_with(Mutation::Update(before.into_row())),
            );
        }
        Some(Stage23Change::Insert(after)) => {
            let key = Stage23Score::row_key(after.key());
            plan = plan.step(
                SagaStep::new(stage23_partition, Mutation::Insert(after.into_row()))
                    .undo_with(Mutation::Delete(key)),
            );
        }
        None => {}
    }
    plan
}

/// Delete stage-1, then stage-2/3 when one exists. Deleted rows are
/// re-inserted from their snapshots on rollback.
#[must_use]
pub fn delete_registration(
    stage1_partition: PartitionId,
    stage1_snapshot: Stage1Score,
    stage23: Option<(PartitionId, Stage23Score)>,
) -> SagaPlan {
    let stage1_key = Stage1Score::row_key(stage1_snapshot.key());
    let mut plan = SagaPlan::new("delete-registration")
        .require_present(stage1_partition, stage1_key.clone())
        .step(
            SagaStep::new(stage1_partition, Mutation::Delete(stage1_key))
                .undo_with(Mutation::Insert(stage1_snapshot.into_row())),
        );
    if let Some((partition, snapshot)) = stage23 {
        let key = Stage23Score::row_key(snapshot.key());
        plan = plan.step(
            SagaStep::new(partition, Mutation::Delete(key))
                .undo_with(Mutation::Insert(snapshot.into_row())),
        );
    }
    plan
}

/// Moves a row to the partition of its new fragmentation key: insert the
/// full row at `to`, then delete it from `from`.
///
/// If the delete fails the new copy is kept, not removed: removing it could
/// lose the only copy written successfully. The caller is warned that the row
/// now exists on both partitions.
pub fn transfer<E: Entity>(from: &PartitionDef, to: &PartitionDef, moved: E) -> SagaPlan {
    let key = moved.key();
    let warning = format!(
        "{} {key}: data remains duplicated at both sites ({from} and {to}) until manually reconciled",
        E::TABLE
    );
    SagaPlan::new("transfer")
        .require_present(from.id, E::row_key(key.clone()))
        .require_absent(to.id, E::row_key(key.clone()))
        .step(SagaStep::new(to.id, Mutation::Insert(moved.into_row())).retain_on_failure(warning))
        .step(SagaStep::new(from.id, Mutation::Delete(E::row_key(key))))
}

#[cfg(test)]
mod tests {
    use fragdb_core::{ErrorKind, SagaStatus, StudentRecord};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::testing::{stage1, stage23, Fault, Harness};

    const STAGE1: PartitionId = PartitionId(5);
    const STAGE23_K1: PartitionId = PartitionId(6);

    #[tokio::test]
    async fn create_registration_rolls_back_stage1_when_stage23_fails() {
        let harness = Harness::seeded().await;
        harness.fail(STAGE23_K1, Fault::Insert);

        let plan = create_registration(
            STAGE1,
            STAGE23_K1,
            stage1("SV003", "M05", Some(6.0)),
            stage23("SV003", "M05", Some(7.0), None),
        );
        let report = harness.sagas().run(plan, &CancellationToken::new()).await;

        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        let last = report.transaction.steps.last().unwrap();
        assert_eq!(last.label(), "Delete (Compensating)");
        assert!(last.success);
        assert!(report.warnings.is_empty());
        assert!(harness.stage1_at(STAGE1, "SV003", "M05").await.is_none());
    }

    #[tokio::test]
    async fn failed_compensation_leaves_stage1_and_warns() {
        let harness = Harness::seeded().await;
        harness.fail(STAGE23_K1, Fault::Insert);
        harness.fail(STAGE1, Fault::Delete);

        let plan = create_registration(
            STAGE1,
            STAGE23_K1,
            stage1("SV003", "M05", Some(6.0)),
            stage23("SV003", "M05", None, None),
        );
        let result = harness
            .sagas()
            .run(plan, &CancellationToken::new())
            .await
            .into_result("created", ());

        let tx = result.transaction.as_ref().unwrap();
        assert_eq!(tx.status, SagaStatus::RolledBack);
        assert!(!tx.steps.last().unwrap().success);
        assert!(tx.steps.last().unwrap().compensating);
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::CompensationFailed));
        assert!(result.warnings[0].contains("data may be inconsistent"));
        assert!(harness.stage1_at(STAGE1, "SV003", "M05").await.is_some());
    }

    #[tokio::test]
    async fn update_scores_restores_stage1_on_failure() {
        let harness = Harness::seeded().await;
        harness.fail(STAGE23_K1, Fault::Update);

        let before = harness.stage1_at(STAGE1, "SV001", "M01").await.unwrap();
        let before23 = harness.stage23_at(STAGE23_K1, "SV001", "M01").await.unwrap();
        let plan = update_scores(
            STAGE1,
            &before,
            Some(stage1("SV001", "M01", Some(1.0))),
            STAGE23_K1,
            Some(Stage23Change::Update {
                after: stage23("SV001", "M01", Some(1.0), Some(1.0)),
                before: before23,
            }),
        );
        let report = harness.sagas().run(plan, &CancellationToken::new()).await;

        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        let restored = harness.stage1_at(STAGE1, "SV001", "M01").await.unwrap();
        assert_eq!(restored, before);
    }

    #[tokio::test]
    async fn delete_registration_reinserts_snapshot_on_failure() {
        let harness = Harness::seeded().await;
        harness.fail(STAGE23_K1, Fault::Delete);

        let snapshot = harness.stage1_at(STAGE1, "SV001", "M01").await.unwrap();
        let snapshot23 = harness.stage23_at(STAGE23_K1, "SV001", "M01").await.unwrap();
        let plan = delete_registration(STAGE1, snapshot.clone(), Some((STAGE23_K1, snapshot23)));
        let report = harness.sagas().run(plan, &CancellationToken::new()).await;

        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        let labels: Vec<_> = report.transaction.steps.iter().map(|s| s.label()).collect();
        assert_eq!(labels, ["Delete", "Delete", "Insert (Compensating)"]);
        assert_eq!(harness.stage1_at(STAGE1, "SV001", "M01").await, Some(snapshot));
    }

    #[tokio::test]
    async fn transfer_keeps_both_copies_when_old_delete_fails() {
        let harness = Harness::seeded().await;
        let from = harness.registry.partition(PartitionId(3)).unwrap().clone();
        let to = harness.registry.partition(PartitionId(4)).unwrap().clone();
        harness.fail(from.id, Fault::Delete);

        let mut moved = harness.student_at(from.id, "SV001").await.unwrap();
        moved.class_id = "L02".to_string();
        let result = harness
            .sagas()
            .run(transfer(&from, &to, moved), &CancellationToken::new())
            .await
            .into_result("moved", ());

        assert!(!result.success);
        let tx = result.transaction.as_ref().unwrap();
        assert_eq!(tx.status, SagaStatus::PartialSuccess);
        assert_eq!(tx.steps.len(), 2);
        assert!(tx.steps.iter().all(|s| !s.compensating));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("data remains duplicated at both sites"));

        let old: Option<StudentRecord> = harness.student_at(from.id, "SV001").await;
        let new: Option<StudentRecord> = harness.student_at(to.id, "SV001").await;
        assert_eq!(old.unwrap().class_id, "L01");
        assert_eq!(new.unwrap().class_id, "L02");
    }

    #[tokio::test]
    async fn transfer_failing_insert_touches_nothing_else() {
        let harness = Harness::seeded().await;
        let from = harness.registry.partition(PartitionId(3)).unwrap().clone();
        let to = harness.registry.partition(PartitionId(4)).unwrap().clone();
        harness.fail(to.id, Fault::Insert);

        let moved = harness.student_at(from.id, "SV001").await.unwrap();
        let report = harness
            .sagas()
            .run(transfer(&from, &to, moved), &CancellationToken::new())
            .await;

        assert_eq!(report.transaction.status, SagaStatus::RolledBack);
        assert_eq!(report.transaction.steps.len(), 1);
        assert!(report.warnings.is_empty());
        assert!(harness.student_at(from.id, "SV001").await.is_some());
    }

    #[tokio::test]
    async fn transfer_moves_the_row() {
        let harness = Harness::seeded().await;
        let from = harness.registry.partition(PartitionId(3)).unwrap().clone();
        let to = harness.registry.partition(PartitionId(4)).unwrap().clone();

        let moved = harness.student_at(from.id, "SV002").await.unwrap();
        let report = harness
            .sagas()
            .run(transfer(&from, &to, moved), &CancellationToken::new())
            .await;

        assert!(report.is_committed());
        assert!(harness.student_at(from.id, "SV002").await.is_none());
        assert!(harness.student_at(to.id, "SV002").await.is_some());
    }
}

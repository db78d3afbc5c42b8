//! Registration service: subject registrations and their three scores,
//! split between the stage-1 and stage-2/3 partitions.

use std::sync::Arc;

use fragdb_core::score::is_valid_score;
use fragdb_core::{
    GatewayError, GatewayResult, OperationResult, Page, Predicate, ScanRequest, ScoreKey,
    Stage1Score, Stage23Score,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::student::StudentService;
use super::{domain_service, page_or_default};
use crate::query::join::join_stages;
use crate::query::{JoinKind, ScoreQuery, ScoreRow};
use crate::saga::plans::{self, Stage23Change};
use crate::service::context::GatewayContext;
use crate::service::operation::{OperationError, OperationResponse};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewRegistration {
    pub student_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub score1: Option<f64>,
    #[serde(default)]
    pub score2: Option<f64>,
    #[serde(default)]
    pub score3: Option<f64>,
}

/// Scores to overwrite. Absent scores keep their stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ScorePatch {
    pub score1: Option<f64>,
    pub score2: Option<f64>,
    pub score3: Option<f64>,
}

impl ScorePatch {
    fn is_empty(&self) -> bool {
        self.score1.is_none() && self.score2.is_none() && self.score3.is_none()
    }

    fn touches_later_stages(&self) -> bool {
        self.score2.is_some() || self.score3.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationRequest {
    List { page: Option<Page> },
    ScoresOf { student_id: String },
    StudentsOfSubject { subject_id: String, include_scores: bool, page: Option<Page> },
    Create(NewRegistration),
    UpdateScores { student_id: String, subject_id: String, patch: ScorePatch },
    Delete { student_id: String, subject_id: String },
}

pub struct RegistrationService {
    ctx: Arc<GatewayContext>,
    students: StudentService,
}

impl RegistrationService {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            students: StudentService::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// A page of registrations in (student, subject) order, with later
    /// scores and student identity attached where they exist.
    ///
    /// # Errors
    ///
    /// Fails if any partition read fails.
    pub async fn list(&self, page: Page, cancel: &CancellationToken) -> GatewayResult<Vec<ScoreRow>> {
        let query = ScoreQuery {
            page,
            ..ScoreQuery::default()
        };
        self.ctx.engine.score_rows(&query, cancel).await
    }

    /// Every registration of one student. Only the stage-2/3 partition of the
    /// student's department is read.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown students.
    pub async fn scores_of(&self, student_id: &str, cancel: &CancellationToken) -> GatewayResult<Vec<ScoreRow>> {
        let department = self.students.department_of(student_id, cancel).await?;
        let query = ScoreQuery {
            student_id: Some(student_id.to_string()),
            department: Some(department),
            ..ScoreQuery::default()
        };
        self.ctx.engine.score_rows(&query, cancel).await
    }

    /// Registrations of one subject. Without scores only the stage-1
    /// partition is read; with scores, registrations of students that no
    /// longer exist are dropped.
    ///
    /// # Errors
    ///
    /// Fails if any partition read fails.
    pub async fn students_of_subject(
        &self,
        subject_id: &str,
        include_scores: bool,
        page: Page,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<ScoreRow>> {
        if include_scores {
            let query = ScoreQuery {
                subject_id: Some(subject_id.to_string()),
                student_join: JoinKind::Inner,
                page,
                ..ScoreQuery::default()
            };
            return self.ctx.engine.score_rows(&query, cancel).await;
        }

        let request = ScanRequest::filtered(Predicate::eq("subject_id", subject_id)).with_page(page);
        let first = self.ctx.engine.union::<Stage1Score>(&request, cancel).await?;
        Ok(join_stages(first, Vec::new()))
    }

    pub async fn create(&self, new: NewRegistration, cancel: &CancellationToken) -> OperationResult<ScoreRow> {
        match self.try_create(new, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_create(
        &self,
        new: NewRegistration,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<ScoreRow>, OperationResult<ScoreRow>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let key = validate_key(&new.student_id, &new.subject_id).map_err(reject)?;
        validate_scores(&[new.score1, new.score2, new.score3]).map_err(reject)?;
        let department = self
            .students
            .department_of(&key.student_id, cancel)
            .await
            .map_err(reject)?;
        let first_site = self.ctx.registry.stage1().resolve(&department).map_err(reject)?;
        let later_site = self.ctx.registry.stage23().resolve(&department).map_err(reject)?;

        let stage1 = Stage1Score {
            student_id: key.student_id.clone(),
            subject_id: key.subject_id.clone(),
            score1: new.score1,
        };
        let stage23 = Stage23Score {
            student_id: key.student_id.clone(),
            subject_id: key.subject_id.clone(),
            score2: new.score2,
            score3: new.score3,
        };
        let row = ScoreRow {
            student_id: key.student_id.clone(),
            subject_id: key.subject_id.clone(),
            full_name: None,
            department: Some(department),
            score1: new.score1,
            score2: new.score2,
            score3: new.score3,
        };

        let plan = plans::create_registration(first_site.id(), later_site.id(), stage1, stage23);
        let report = self.ctx.sagas.run(plan, cancel).await;
        Ok(report.into_result(
            format!(
                "registration {key} created on {} and {}",
                first_site.def(),
                later_site.def()
            ),
            row,
        ))
    }

    /// Overwrites the supplied scores. A missing stage-2/3 row is inserted
    /// when a later score is supplied.
    pub async fn update_scores(
        &self,
        student_id: &str,
        subject_id: &str,
        patch: ScorePatch,
        cancel: &CancellationToken,
    ) -> OperationResult<ScoreRow> {
        match self.try_update_scores(student_id, subject_id, patch, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_update_scores(
        &self,
        student_id: &str,
        subject_id: &str,
        patch: ScorePatch,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<ScoreRow>, OperationResult<ScoreRow>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let key = validate_key(student_id, subject_id).map_err(reject)?;
        if patch.is_empty() {
            return Err(reject(GatewayError::validation("no score supplied")));
        }
        validate_scores(&[patch.score1, patch.score2, patch.score3]).map_err(reject)?;

        let first = self
            .ctx
            .registry
            .stage1()
            .lookup_key_owner(&key, cancel)
            .await
            .map_err(reject)?
            .ok_or_else(|| reject(GatewayError::not_found(format!("registration {key}"))))?;
        let stage1_partition = first.site.id();
        let snapshot = first.record;
        let stage1_after = patch.score1.map(|score1| Stage1Score {
            score1: Some(score1),
            ..snapshot.clone()
        });

        let later = self
            .ctx
            .registry
            .stage23()
            .lookup_key_owner(&key, cancel)
            .await
            .map_err(reject)?;
        let (stage23_partition, department, before) = match later {
            Some(located) => (
                located.site.id(),
                located.department().cloned(),
                Some(located.record),
            ),
            None => {
                let department = self
                    .students
                    .department_of(student_id, cancel)
                    .await
                    .map_err(reject)?;
                let site = self.ctx.registry.stage23().resolve(&department).map_err(reject)?;
                (site.id(), Some(department), None)
            }
        };

        let change = patch.touches_later_stages().then(|| {
            let merged = Stage23Score {
                student_id: key.student_id.clone(),
                subject_id: key.subject_id.clone(),
                score2: patch.score2.or(before.as_ref().and_then(|b| b.score2)),
                score3: patch.score3.or(before.as_ref().and_then(|b| b.score3)),
            };
            match &before {
                Some(before) => Stage23Change::Update {
                    before: before.clone(),
                    after: merged,
                },
                None => Stage23Change::Insert(merged),
            }
        });

        let row = ScoreRow {
            student_id: key.student_id.clone(),
            subject_id: key.subject_id.clone(),
            full_name: None,
            department,
            score1: patch.score1.or(snapshot.score1),
            score2: patch.score2.or(before.as_ref().and_then(|b| b.score2)),
            score3: patch.score3.or(before.as_ref().and_then(|b| b.score3)),
        };

        let plan = plans::update_scores(stage1_partition, &snapshot, stage1_after, stage23_partition, change);
        let report = self.ctx.sagas.run(plan, cancel).await;
        Ok(report.into_result(format!("scores of registration {key} updated"), row))
    }

    /// Deletes both halves of a registration. Works for registrations whose
    /// student has already been deleted.
    pub async fn delete(&self, student_id: &str, subject_id: &str, cancel: &CancellationToken) -> OperationResult<String> {
        match self.try_delete(student_id, subject_id, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_delete(
        &self,
        student_id: &str,
        subject_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<String>, OperationResult<String>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let key = validate_key(student_id, subject_id).map_err(reject)?;
        let (first, later) = futures_util::try_join!(
            self.ctx.registry.stage1().lookup_key_owner(&key, cancel),
            self.ctx.registry.stage23().lookup_key_owner(&key, cancel),
        )
        .map_err(reject)?;
        let first = first.ok_or_else(|| reject(GatewayError::not_found(format!("registration {key}"))))?;

        let plan = plans::delete_registration(
            first.site.id(),
            first.record,
            later.map(|located| (located.site.id(), located.record)),
        );
        let report = self.ctx.sagas.run(plan, cancel).await;
        Ok(report.into_result(format!("registration {key} deleted"), key.to_string()))
    }

    async fn handle(
        &self,
        request: RegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, OperationError> {
        match request {
            RegistrationRequest::List { page } => {
                let page = page_or_default(&self.ctx, page);
                OperationResponse::data(&self.list(page, cancel).await?)
            }
            RegistrationRequest::ScoresOf { student_id } => {
                OperationResponse::data(&self.scores_of(&student_id, cancel).await?)
            }
            RegistrationRequest::StudentsOfSubject {
                subject_id,
                include_scores,
                page,
            } => {
                let page = page_or_default(&self.ctx, page);
                OperationResponse::data(
                    &self
                        .students_of_subject(&subject_id, include_scores, page, cancel)
                        .await?,
                )
            }
            RegistrationRequest::Create(new) => OperationResponse::outcome(self.create(new, cancel).await),
            RegistrationRequest::UpdateScores {
                student_id,
                subject_id,
                patch,
            } => OperationResponse::outcome(
                self.update_scores(&student_id, &subject_id, patch, cancel)
                    .await,
            ),
            RegistrationRequest::Delete {
                student_id,
                subject_id,
            } => OperationResponse::outcome(self.delete(&student_id, &subject_id, cancel).await),
        }
    }
}

domain_service!(RegistrationService, Registration);

fn validate_key(student_id: &str, subject_id: &str) -> GatewayResult<ScoreKey> {
    let (student_id, subject_id) = (student_id.trim(), subject_id.trim());
    if student_id.is_empty() || subject_id.is_empty() {
        return Err(GatewayError::validation("student id and subject id are required"));
    }
    Ok(ScoreKey::new(student_id, subject_id))
}

fn validate_scores(scores: &[Option<f64>]) -> GatewayResult<()> {
    match scores.iter().flatten().find(|s| !is_valid_score(**s)) {
        Some(bad) => Err(GatewayError::validation(format!("score {bad} is outside [0, 10]"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use fragdb_core::{ErrorKind, PartitionId, SagaStatus};

    use super::*;
    use crate::testing::{dept, stage1, Fault, Harness};

    fn service(harness: &Harness) -> RegistrationService {
        RegistrationService::new(Arc::clone(&harness.ctx))
    }

    fn keys(rows: &[ScoreRow]) -> Vec<(&str, &str)> {
        rows.iter()
            .map(|r| (r.student_id.as_str(), r.subject_id.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn list_pages_in_key_order_with_identity() {
        let harness = Harness::seeded().await;
        let rows = service(&harness)
            .list(Page::numbered(1, 3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(keys(&rows), [("SV001", "M01"), ("SV001", "M02"), ("SV002", "M01")]);
        assert_eq!(rows[0].full_name.as_deref(), Some("Student SV001"));
        assert_eq!(rows[0].score2, Some(8.0));
        assert_eq!(rows[1].score2, None);
        assert_eq!(rows[1].department, Some(dept("K1")));
    }

    #[tokio::test]
    async fn scores_of_reads_own_department_only() {
        let harness = Harness::seeded().await;
        harness.fail(PartitionId(6), Fault::Scan);
        let rows = service(&harness)
            .scores_of("SV004", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(keys(&rows), [("SV004", "M01")]);
        assert_eq!(rows[0].score3, Some(9.5));
    }

    #[tokio::test]
    async fn scores_of_unknown_student_is_not_found() {
        let harness = Harness::seeded().await;
        let err = service(&harness)
            .scores_of("SV999", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn students_of_subject_with_and_without_scores() {
        let harness = Harness::seeded().await;
        let svc = service(&harness);
        let cancel = CancellationToken::new();

        let bare = svc.students_of_subject("M01", false, Page::all(), &cancel).await.unwrap();
        assert_eq!(bare.len(), 4);
        assert!(bare.iter().all(|r| r.score2.is_none() && r.full_name.is_none()));

        let full = svc.students_of_subject("M01", true, Page::all(), &cancel).await.unwrap();
        assert_eq!(full.len(), 4);
        assert!(full.iter().all(|r| r.score2.is_some() && r.full_name.is_some()));
    }

    #[tokio::test]
    async fn create_writes_both_halves() {
        let harness = Harness::seeded().await;
        let result = service(&harness)
            .create(
                NewRegistration {
                    student_id: "SV004".into(),
                    subject_id: "M02".into(),
                    score1: Some(6.0),
                    score2: Some(7.0),
                    score3: None,
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.transaction.unwrap().status, SagaStatus::Committed);
        assert!(harness.stage1_at(PartitionId(5), "SV004", "M02").await.is_some());
        let later = harness.stage23_at(PartitionId(7), "SV004", "M02").await.unwrap();
        assert_eq!(later.score2, Some(7.0));
    }

    #[tokio::test]
    async fn create_rolls_back_stage1_when_stage23_fails() {
        let harness = Harness::seeded().await;
        harness.fail(PartitionId(6), Fault::Insert);
        let result = service(&harness)
            .create(
                NewRegistration {
                    student_id: "SV002".into(),
                    subject_id: "M03".into(),
                    score1: Some(5.0),
                    ..NewRegistration::default()
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::PartitionUnavailable));
        assert_eq!(result.transaction.unwrap().status, SagaStatus::RolledBack);
        assert!(harness.stage1_at(PartitionId(5), "SV002", "M03").await.is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_bad_scores() {
        let harness = Harness::seeded().await;
        let svc = service(&harness);
        let cancel = CancellationToken::new();

        let duplicate = svc
            .create(
                NewRegistration {
                    student_id: "SV001".into(),
                    subject_id: "M01".into(),
                    ..NewRegistration::default()
                },
                &cancel,
            )
            .await;
        assert_eq!(duplicate.error, Some(ErrorKind::Conflict));

        let out_of_range = svc
            .create(
                NewRegistration {
                    student_id: "SV001".into(),
                    subject_id: "M09".into(),
                    score1: Some(10.5),
                    ..NewRegistration::default()
                },
                &cancel,
            )
            .await;
        assert_eq!(out_of_range.error, Some(ErrorKind::ValidationFailed));
        assert!(out_of_range.transaction.is_none());
    }

    #[tokio::test]
    async fn update_scores_merges_and_inserts_missing_stage23() {
        let harness = Harness::seeded().await;
        let svc = service(&harness);
        let cancel = CancellationToken::new();

        let result = svc
            .update_scores(
                "SV001",
                "M02",
                ScorePatch {
                    score2: Some(7.0),
                    ..ScorePatch::default()
                },
                &cancel,
            )
            .await;
        assert!(result.success, "{}", result.message);
        let row = result.data.unwrap();
        assert_eq!((row.score1, row.score2, row.score3), (Some(6.0), Some(7.0), None));
        let inserted = harness.stage23_at(PartitionId(6), "SV001", "M02").await.unwrap();
        assert_eq!(inserted.score2, Some(7.0));

        let empty = svc.update_scores("SV001", "M01", ScorePatch::default(), &cancel).await;
        assert_eq!(empty.error, Some(ErrorKind::ValidationFailed));

        let missing = svc
            .update_scores(
                "SV003",
                "M01",
                ScorePatch {
                    score1: Some(1.0),
                    ..ScorePatch::default()
                },
                &cancel,
            )
            .await;
        assert_eq!(missing.error, Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn update_scores_restores_stage1_on_failure() {
        let harness = Harness::seeded().await;
        harness.fail(PartitionId(6), Fault::Update);
        let result = service(&harness)
            .update_scores(
                "SV001",
                "M01",
                ScorePatch {
                    score1: Some(1.0),
                    score3: Some(1.0),
                    ..ScorePatch::default()
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.transaction.unwrap().status, SagaStatus::RolledBack);
        assert_eq!(
            harness.stage1_at(PartitionId(5), "SV001", "M01").await,
            Some(stage1("SV001", "M01", Some(7.5)))
        );
    }

    #[tokio::test]
    async fn delete_removes_both_halves_and_reinserts_on_failure() {
        let harness = Harness::seeded().await;
        let svc = service(&harness);
        let cancel = CancellationToken::new();

        harness.fail(PartitionId(7), Fault::Delete);
        let failed = svc.delete("SV004", "M01", &cancel).await;
        assert!(!failed.success);
        assert!(harness.stage1_at(PartitionId(5), "SV004", "M01").await.is_some());

        let deleted = svc.delete("SV002", "M01", &cancel).await;
        assert!(deleted.success, "{}", deleted.message);
        assert!(harness.stage1_at(PartitionId(5), "SV002", "M01").await.is_none());
        assert!(harness.stage23_at(PartitionId(6), "SV002", "M01").await.is_none());

        let again = svc.delete("SV002", "M01", &cancel).await;
        assert_eq!(again.error, Some(ErrorKind::NotFound));
    }
}

//! Report service: cross-partition aggregations.

use std::sync::Arc;

use fragdb_core::score::is_valid_score;
use fragdb_core::{
    Department, GatewayError, GatewayResult, Predicate, SortSpec, StudentRecord, DEPARTMENT_FIELD,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::domain_service;
use crate::query::aggregate::{
    averages_by_subject, distribution, failures, FailingRecord, ScoreDistribution, SubjectAverage,
};
use crate::query::{JoinKind, ScoreQuery};
use crate::service::context::GatewayContext;
use crate::service::operation::{OperationError, OperationResponse};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScholarshipEntry {
    pub student_id: String,
    pub full_name: String,
    pub department: Option<Department>,
    pub class_id: String,
    pub scholarship: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportRequest {
    Scholarships { department: Option<String>, min_amount: f64, top: Option<usize> },
    Averages { department: Option<String>, subject_id: Option<String> },
    Failures { threshold: Option<f64>, department: Option<String>, subject_id: Option<String> },
    Distribution { subject_id: String, department: Option<String> },
}

pub struct ReportService {
    ctx: Arc<GatewayContext>,
}

impl ReportService {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// Highest scholarships first. Each student partition returns its own
    /// top `top`; the merged list is cut to `top` again.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department; otherwise any partition
    /// read failure.
    pub async fn scholarships(
        &self,
        department: Option<&str>,
        min_amount: f64,
        top: Option<usize>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<ScholarshipEntry>> {
        let mut terms = vec![Predicate::gte("scholarship", min_amount)];
        if let Some(department) = self.ctx.department_opt(department)? {
            terms.push(Predicate::eq(DEPARTMENT_FIELD, department.as_str()));
        }
        let top = top.unwrap_or(self.ctx.config.scholarship_top);
        let rows = self
            .ctx
            .engine
            .top_n::<StudentRecord>(Predicate::all(terms), SortSpec::desc("scholarship"), top, cancel)
            .await?;
        Ok(rows
            .into_iter()
            .map(|t| ScholarshipEntry {
                scholarship: t.record.scholarship.unwrap_or(0.0),
                student_id: t.record.student_id,
                full_name: t.record.full_name,
                department: t.department,
                class_id: t.record.class_id,
            })
            .collect())
    }

    /// Averages per (subject, department) over every registration.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department; otherwise any partition
    /// read failure.
    pub async fn averages(
        &self,
        department: Option<&str>,
        subject_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<SubjectAverage>> {
        let query = ScoreQuery {
            subject_id: subject_id.map(str::to_string),
            department: self.ctx.department_opt(department)?,
            ..ScoreQuery::default()
        };
        let rows = self.ctx.engine.score_rows(&query, cancel).await?;
        Ok(averages_by_subject(&rows))
    }

    /// Registrations of existing students averaging below `threshold`
    /// (configured default when absent), lowest first.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department or a threshold outside
    /// [0, 10]; otherwise any partition read failure.
    pub async fn failures(
        &self,
        threshold: Option<f64>,
        department: Option<&str>,
        subject_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<FailingRecord>> {
        let threshold = threshold.unwrap_or(self.ctx.config.failure_threshold);
        if !is_valid_score(threshold) {
            return Err(GatewayError::validation(format!(
                "threshold {threshold} is outside [0, 10]"
            )));
        }
        let query = ScoreQuery {
            subject_id: subject_id.map(str::to_string),
            department: self.ctx.department_opt(department)?,
            student_join: JoinKind::Inner,
            ..ScoreQuery::default()
        };
        let rows = self.ctx.engine.score_rows(&query, cancel).await?;
        Ok(failures(rows, threshold))
    }

    /// Histogram of one subject's per-record averages, per department. All
    /// served departments are listed unless one is named.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department; otherwise any partition
    /// read failure.
    pub async fn distribution(
        &self,
        subject_id: &str,
        department: Option<&str>,
        cancel: &CancellationToken,
    ) -> GatewayResult<ScoreDistribution> {
        let department = self.ctx.department_opt(department)?;
        let query = ScoreQuery {
            subject_id: Some(subject_id.to_string()),
            department: department.clone(),
            ..ScoreQuery::default()
        };
        let rows = self.ctx.engine.score_rows(&query, cancel).await?;
        let departments = match department {
            Some(department) => vec![department],
            None => self.ctx.registry.layout().departments().into_iter().collect(),
        };
        Ok(distribution(subject_id, &rows, departments))
    }

    async fn handle(
        &self,
        request: ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, OperationError> {
        match request {
            ReportRequest::Scholarships {
                department,
                min_amount,
                top,
            } => OperationResponse::data(
                &self
                    .scholarships(department.as_deref(), min_amount, top, cancel)
                    .await?,
            ),
            ReportRequest::Averages {
                department,
                subject_id,
            } => OperationResponse::data(
                &self
                    .averages(department.as_deref(), subject_id.as_deref(), cancel)
                    .await?,
            ),
            ReportRequest::Failures {
                threshold,
                department,
                subject_id,
            } => OperationResponse::data(
                &self
                    .failures(threshold, department.as_deref(), subject_id.as_deref(), cancel)
                    .await?,
            ),
            ReportRequest::Distribution {
                subject_id,
                department,
            } => OperationResponse::data(
                &self
                    .distribution(&subject_id, department.as_deref(), cancel)
                    .await?,
            ),
        }
    }
}

domain_service!(ReportService, Report);

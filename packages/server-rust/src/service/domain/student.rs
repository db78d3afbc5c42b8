//! Student service.
//!
//! Students carry no department column: the partition holding a student is
//! the department. A class change that crosses departments is therefore a
//! move between partitions, run as a transfer saga.

use std::sync::Arc;

use fragdb_core::{
    Department, GatewayError, GatewayResult, OperationResult, Page, Predicate, ScanRequest,
    StudentRecord, DEPARTMENT_FIELD,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{domain_service, page_or_default};
use crate::registry::Located;
use crate::saga::plans;
use crate::sequence::next_id;
use crate::service::context::GatewayContext;
use crate::service::operation::{OperationError, OperationResponse};

/// A student with the department their partition implies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentView {
    #[serde(flatten)]
    pub record: StudentRecord,
    pub department: Option<Department>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewStudent {
    pub full_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    pub class_id: String,
    #[serde(default)]
    pub scholarship: Option<f64>,
}

/// Fields to overwrite; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StudentPatch {
    pub full_name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub class_id: Option<String>,
    pub scholarship: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StudentRequest {
    DepartmentOf { student_id: String },
    Get { student_id: String },
    Search { q: Option<String>, department: Option<String>, page: Option<Page> },
    Create(NewStudent),
    Update { student_id: String, patch: StudentPatch },
    Delete { student_id: String },
}

pub struct StudentService {
    ctx: Arc<GatewayContext>,
}

impl StudentService {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// The department owning `student_id`, from a parallel lookup on every
    /// student partition.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown students; `PartitionUnavailable` if any lookup fails.
    pub async fn department_of(&self, student_id: &str, cancel: &CancellationToken) -> GatewayResult<Department> {
        let located = self.ctx.locate_student(student_id, cancel).await?;
        self.department_of_located(&located, cancel).await
    }

    /// # Errors
    ///
    /// `NotFound` for unknown students; `PartitionUnavailable` if any lookup fails.
    pub async fn get(&self, student_id: &str, cancel: &CancellationToken) -> GatewayResult<StudentView> {
        let located = self.ctx.locate_student(student_id, cancel).await?;
        let department = self.department_of_located(&located, cancel).await?;
        Ok(StudentView {
            record: located.record,
            department: Some(department),
        })
    }

    /// Students whose name contains `q` (case-insensitive) or whose id
    /// contains it, optionally within one department.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department; `PartitionUnavailable`
    /// if any partition read fails.
    pub async fn search(
        &self,
        q: Option<&str>,
        department: Option<&str>,
        page: Page,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<StudentView>> {
        let mut terms = Vec::new();
        if let Some(q) = q.map(str::trim).filter(|q| !q.is_empty()) {
            terms.push(Predicate::any(vec![
                Predicate::contains("full_name", q),
                Predicate::contains("student_id", q),
            ]));
        }
        if let Some(department) = self.ctx.department_opt(department)? {
            terms.push(Predicate::eq(DEPARTMENT_FIELD, department.as_str()));
        }

        let request = ScanRequest::filtered(Predicate::all(terms)).with_page(page);
        let rows = self.ctx.engine.scatter::<StudentRecord>(&request, cancel).await?;
        Ok(rows
            .into_iter()
            .map(|t| StudentView {
                record: t.record,
                department: t.department,
            })
            .collect())
    }

    /// Creates a student in the partition of their class's department, with
    /// the next free global id.
    pub async fn create(&self, new: NewStudent, cancel: &CancellationToken) -> OperationResult<StudentView> {
        match self.try_create(new, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_create(
        &self,
        new: NewStudent,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<StudentView>, OperationResult<StudentView>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        validate_student(&new.full_name, new.scholarship).map_err(reject)?;
        let class = self.ctx.locate_class(&new.class_id, cancel).await.map_err(reject)?;
        let department = class.record.department.clone();
        let students = self.ctx.registry.students();
        let site = students.resolve(&department).map_err(reject)?;
        let student_id = next_id(students, &self.ctx.config.student_ids, cancel)
            .await
            .map_err(reject)?;

        let record = StudentRecord {
            student_id: student_id.clone(),
            full_name: new.full_name.trim().to_string(),
            gender: new.gender,
            birth_date: new.birth_date,
            class_id: new.class_id,
            scholarship: new.scholarship,
        };
        let view = StudentView {
            record: record.clone(),
            department: Some(department.clone()),
        };
        let report = self
            .ctx
            .sagas
            .run(plans::insert_record("create-student", site.id(), record), cancel)
            .await;
        Ok(report.into_result(format!("student {student_id} created in {department}"), view))
    }

    /// Merges `patch` over the current record. A class in another
    /// department moves the student with a transfer saga.
    pub async fn update(
        &self,
        student_id: &str,
        patch: StudentPatch,
        cancel: &CancellationToken,
    ) -> OperationResult<StudentView> {
        match self.try_update(student_id, patch, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_update(
        &self,
        student_id: &str,
        patch: StudentPatch,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<StudentView>, OperationResult<StudentView>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let current = self.ctx.locate_student(student_id, cancel).await.map_err(reject)?;
        let current_department = self
            .department_of_located(&current, cancel)
            .await
            .map_err(reject)?;

        let target_department = match &patch.class_id {
            Some(class_id) if *class_id != current.record.class_id => {
                let class = self.ctx.locate_class(class_id, cancel).await.map_err(reject)?;
                class.record.department.clone()
            }
            _ => current_department.clone(),
        };

        let merged = StudentRecord {
            student_id: current.record.student_id.clone(),
            full_name: patch
                .full_name
                .map_or_else(|| current.record.full_name.clone(), |n| n.trim().to_string()),
            gender: patch.gender.or_else(|| current.record.gender.clone()),
            birth_date: patch.birth_date.or_else(|| current.record.birth_date.clone()),
            class_id: patch.class_id.unwrap_or_else(|| current.record.class_id.clone()),
            scholarship: patch.scholarship.or(current.record.scholarship),
        };
        validate_student(&merged.full_name, merged.scholarship).map_err(reject)?;

        let view = StudentView {
            record: merged.clone(),
            department: Some(target_department.clone()),
        };
        let from = current.site.def();
        let to = self
            .ctx
            .registry
            .students()
            .resolve(&target_department)
            .map_err(reject)?
            .def();

        if from.id == to.id {
            let report = self
                .ctx
                .sagas
                .run(plans::update_record("update-student", from.id, merged), cancel)
                .await;
            return Ok(report.into_result(format!("student {student_id} updated"), view));
        }

        tracing::warn!(
            student = student_id,
            from = %current_department,
            to = %target_department,
            "cross-partition transfer"
        );
        let report = self.ctx.sagas.run(plans::transfer(from, to, merged), cancel).await;
        let committed = report.is_committed();
        let result = report.into_result(
            format!("student {student_id} moved from {current_department} to {target_department}"),
            view,
        );
        if !committed {
            return Ok(result);
        }
        Ok(
            match self
                .left_behind_scores(student_id, &current_department, &target_department, cancel)
                .await
            {
                Some(warning) => result.with_warning(warning),
                None => result,
            },
        )
    }

    /// Stage-2/3 rows are not moved with the student. When the two
    /// departments use different stage-2/3 partitions, the rows left on the
    /// old one are reported.
    async fn left_behind_scores(
        &self,
        student_id: &str,
        from: &Department,
        to: &Department,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let sites = self.ctx.registry.stage23();
        let source = sites.resolve(from).ok()?;
        if sites.resolve(to).ok()?.id() == source.id() {
            return None;
        }
        match source
            .store()
            .count(&Predicate::eq("student_id", student_id), cancel)
            .await
        {
            Ok(0) => None,
            Ok(rows) => Some(format!(
                "{rows} stage-2/3 score row(s) of student {student_id} stay on {} and are not listed under {to}",
                source.def()
            )),
            Err(err) => Some(format!(
                "could not check {} for stage-2/3 scores of student {student_id} ({err})",
                source.def()
            )),
        }
    }

    /// Deletes the student row. Score rows are left on the score partitions.
    pub async fn delete(&self, student_id: &str, cancel: &CancellationToken) -> OperationResult<String> {
        let located = match self.ctx.locate_student(student_id, cancel).await {
            Ok(located) => located,
            Err(err) => return OperationResult::rejected(&err),
        };
        let plan = plans::delete_record::<StudentRecord>("delete-student", located.site.id(), student_id.to_string());
        let report = self.ctx.sagas.run(plan, cancel).await;
        let committed = report.is_committed();
        let result = report.into_result(format!("student {student_id} deleted"), student_id.to_string());
        if committed {
            result.with_warning(format!(
                "registrations of student {student_id} are not removed from the score partitions"
            ))
        } else {
            result
        }
    }

    /// The department of a located student: the partition's sole department,
    /// or the student's class department when the partition serves several.
    async fn department_of_located(
        &self,
        located: &Located<'_, StudentRecord>,
        cancel: &CancellationToken,
    ) -> GatewayResult<Department> {
        if let Some(department) = located.department() {
            return Ok(department.clone());
        }
        let class = self.ctx.locate_class(&located.record.class_id, cancel).await?;
        Ok(class.record.department)
    }

    async fn handle(
        &self,
        request: StudentRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, OperationError> {
        match request {
            StudentRequest::DepartmentOf { student_id } => {
                let department = self.department_of(&student_id, cancel).await?;
                OperationResponse::data(&serde_json::json!({
                    "student_id": student_id,
                    "department": department,
                }))
            }
            StudentRequest::Get { student_id } => OperationResponse::data(&self.get(&student_id, cancel).await?),
            StudentRequest::Search { q, department, page } => {
                let page = page_or_default(&self.ctx, page);
                let rows = self.search(q.as_deref(), department.as_deref(), page, cancel).await?;
                OperationResponse::data(&rows)
            }
            StudentRequest::Create(new) => OperationResponse::outcome(self.create(new, cancel).await),
            StudentRequest::Update { student_id, patch } => {
                OperationResponse::outcome(self.update(&student_id, patch, cancel).await)
            }
            StudentRequest::Delete { student_id } => OperationResponse::outcome(self.delete(&student_id, cancel).await),
        }
    }
}

domain_service!(StudentService, Student);

fn validate_student(full_name: &str, scholarship: Option<f64>) -> GatewayResult<()> {
    if full_name.trim().is_empty() {
        return Err(GatewayError::validation("full name must not be empty"));
    }
    if scholarship.is_some_and(|s| !s.is_finite() || s < 0.0) {
        return Err(GatewayError::validation("scholarship must be a non-negative amount"));
    }
    Ok(())
}

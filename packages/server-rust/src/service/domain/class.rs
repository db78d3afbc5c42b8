//! Class service.

use std::sync::Arc;

use fragdb_core::{
    ClassRecord, Department, GatewayError, GatewayResult, OperationResult, Page, Predicate,
    ScanRequest, StudentRecord, DEPARTMENT_FIELD,
};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::student::StudentView;
use super::{domain_service, page_or_default};
use crate::saga::plans;
use crate::sequence::next_id;
use crate::service::context::GatewayContext;
use crate::service::operation::{OperationError, OperationResponse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentSummary {
    pub department: Department,
    pub classes: usize,
    pub students: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewClass {
    pub name: String,
    pub department: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassRequest {
    Departments,
    List { department: Option<String>, q: Option<String>, page: Option<Page> },
    Get { class_id: String },
    Students { class_id: String, page: Option<Page> },
    Create(NewClass),
    Rename { class_id: String, name: String },
    Delete { class_id: String },
}

/// Class and student counts for every department the layout serves,
/// counted on all partitions concurrently.
///
/// # Errors
///
/// Fails if any partition count fails.
pub async fn department_summaries(
    ctx: &GatewayContext,
    cancel: &CancellationToken,
) -> GatewayResult<Vec<DepartmentSummary>> {
    let counts = ctx.registry.layout().departments().into_iter().map(|department| async move {
        let filter = Predicate::eq(DEPARTMENT_FIELD, department.as_str());
        let (classes, students) = futures_util::try_join!(
            ctx.engine.count::<ClassRecord>(&filter, cancel),
            ctx.engine.count::<StudentRecord>(&filter, cancel),
        )?;
        Ok::<_, GatewayError>(DepartmentSummary {
            department,
            classes,
            students,
        })
    });
    try_join_all(counts).await
}

pub struct ClassService {
    ctx: Arc<GatewayContext>,
}

impl ClassService {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Fails if any partition count fails.
    pub async fn departments(&self, cancel: &CancellationToken) -> GatewayResult<Vec<DepartmentSummary>> {
        department_summaries(&self.ctx, cancel).await
    }

    /// # Errors
    ///
    /// `ValidationFailed` for an unknown department; `PartitionUnavailable`
    /// if any partition read fails.
    pub async fn list(
        &self,
        department: Option<&str>,
        q: Option<&str>,
        page: Page,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<ClassRecord>> {
        let mut terms = Vec::new();
        if let Some(department) = self.ctx.department_opt(department)? {
            terms.push(Predicate::eq(DEPARTMENT_FIELD, department.as_str()));
        }
        if let Some(q) = q.map(str::trim).filter(|q| !q.is_empty()) {
            terms.push(Predicate::any(vec![
                Predicate::contains("name", q),
                Predicate::contains("class_id", q),
            ]));
        }
        let request = ScanRequest::filtered(Predicate::all(terms)).with_page(page);
        self.ctx.engine.union(&request, cancel).await
    }

    /// # Errors
    ///
    /// `NotFound` for unknown classes.
    pub async fn get(&self, class_id: &str, cancel: &CancellationToken) -> GatewayResult<ClassRecord> {
        Ok(self.ctx.locate_class(class_id, cancel).await?.record)
    }

    /// Students of a class. Only the student partition of the class's
    /// department is read, with the page pushed down.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown classes.
    pub async fn students_of(
        &self,
        class_id: &str,
        page: Page,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<StudentView>> {
        let class = self.ctx.locate_class(class_id, cancel).await?;
        let filter = Predicate::all(vec![
            Predicate::eq(DEPARTMENT_FIELD, class.record.department.as_str()),
            Predicate::eq("class_id", class_id),
        ]);
        let request = ScanRequest::filtered(filter).with_page(page);
        let rows = self.ctx.engine.scatter::<StudentRecord>(&request, cancel).await?;
        Ok(rows
            .into_iter()
            .map(|t| StudentView {
                record: t.record,
                department: Some(class.record.department.clone()),
            })
            .collect())
    }

    pub async fn create(&self, new: NewClass, cancel: &CancellationToken) -> OperationResult<ClassRecord> {
        match self.try_create(new, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_create(
        &self,
        new: NewClass,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<ClassRecord>, OperationResult<ClassRecord>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let name = validate_name(&new.name).map_err(reject)?;
        let department = self.ctx.department(&new.department).map_err(reject)?;
        let classes = self.ctx.registry.classes();
        let site = classes.resolve(&department).map_err(reject)?;
        let class_id = next_id(classes, &self.ctx.config.class_ids, cancel)
            .await
            .map_err(reject)?;

        let record = ClassRecord {
            class_id: class_id.clone(),
            name,
            department,
        };
        let report = self
            .ctx
            .sagas
            .run(plans::insert_record("create-class", site.id(), record.clone()), cancel)
            .await;
        Ok(report.into_result(format!("class {class_id} created on {}", site.def()), record))
    }

    pub async fn rename(&self, class_id: &str, name: &str, cancel: &CancellationToken) -> OperationResult<ClassRecord> {
        let name = match validate_name(name) {
            Ok(name) => name,
            Err(err) => return OperationResult::rejected(&err),
        };
        let located = match self.ctx.locate_class(class_id, cancel).await {
            Ok(located) => located,
            Err(err) => return OperationResult::rejected(&err),
        };
        let record = ClassRecord {
            name,
            ..located.record
        };
        let report = self
            .ctx
            .sagas
            .run(plans::update_record("rename-class", located.site.id(), record.clone()), cancel)
            .await;
        report.into_result(format!("class {class_id} renamed"), record)
    }

    /// Deletes an empty class. A class with students is a `Conflict`.
    pub async fn delete(&self, class_id: &str, cancel: &CancellationToken) -> OperationResult<String> {
        match self.try_delete(class_id, cancel).await {
            Ok(result) | Err(result) => result,
        }
    }

    async fn try_delete(
        &self,
        class_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OperationResult<String>, OperationResult<String>> {
        let reject = |err: GatewayError| OperationResult::rejected(&err);

        let located = self.ctx.locate_class(class_id, cancel).await.map_err(reject)?;
        let members = Predicate::all(vec![
            Predicate::eq(DEPARTMENT_FIELD, located.record.department.as_str()),
            Predicate::eq("class_id", class_id),
        ]);
        let students = self
            .ctx
            .engine
            .count::<StudentRecord>(&members, cancel)
            .await
            .map_err(reject)?;
        if students > 0 {
            let mut refused = reject(GatewayError::conflict(format!("students of class {class_id}")));
            refused.message = format!("class {class_id} still has {students} student(s)");
            return Err(refused);
        }

        let plan = plans::delete_record::<ClassRecord>("delete-class", located.site.id(), class_id.to_string());
        let report = self.ctx.sagas.run(plan, cancel).await;
        Ok(report.into_result(format!("class {class_id} deleted"), class_id.to_string()))
    }

    async fn handle(
        &self,
        request: ClassRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, OperationError> {
        match request {
            ClassRequest::Departments => OperationResponse::data(&self.departments(cancel).await?),
            ClassRequest::List { department, q, page } => {
                let page = page_or_default(&self.ctx, page);
                OperationResponse::data(&self.list(department.as_deref(), q.as_deref(), page, cancel).await?)
            }
            ClassRequest::Get { class_id } => OperationResponse::data(&self.get(&class_id, cancel).await?),
            ClassRequest::Students { class_id, page } => {
                let page = page_or_default(&self.ctx, page);
                OperationResponse::data(&self.students_of(&class_id, page, cancel).await?)
            }
            ClassRequest::Create(new) => OperationResponse::outcome(self.create(new, cancel).await),
            ClassRequest::Rename { class_id, name } => {
                OperationResponse::outcome(self.rename(&class_id, &name, cancel).await)
            }
            ClassRequest::Delete { class_id } => OperationResponse::outcome(self.delete(&class_id, cancel).await),
        }
    }
}

domain_service!(ClassService, Class);

fn validate_name(name: &str) -> GatewayResult<String> {
    let name = name.trim();
    if name.is_empty() {
        Err(GatewayError::validation("class name must not be empty"))
    } else {
        Ok(name.to_string())
    }
}

//! Departments of rows that do not store one.
//!
//! Students and score rows carry no department column. On a partition
//! serving a single department the partition is the answer. On a partition
//! serving several, or a whole-table one, the gateway follows
//! student → class → department.

use std::collections::{BTreeSet, HashMap};

use fragdb_core::{
    ClassRecord, Department, Entity, GatewayError, GatewayResult, Placement, Predicate,
    ScanRequest, DEPARTMENT_FIELD,
};
use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::registry::{PartitionRegistry, TableSites};

fn text_field<E: Entity>(record: &E, name: &str) -> Option<String> {
    record.field(name).and_then(|v| v.as_text().map(str::to_string))
}

/// Every row of `sites` whose `field` is one of `ids`, with the partition's
/// own department when it has exactly one.
async fn fetch<'a, E: Entity>(
    sites: &'a TableSites<E>,
    field: &str,
    ids: &BTreeSet<String>,
    cancel: &CancellationToken,
) -> GatewayResult<Vec<(Option<&'a Department>, E)>> {
    let request = ScanRequest::filtered(Predicate::is_in(field, ids.iter().cloned()));
    let request = &request;
    let scans = sites.iter().map(|site| async move {
        let rows = site
            .store()
            .scan(request, cancel)
            .await
            .map_err(|err| err.at(site.def()))?;
        Ok::<_, GatewayError>(rows.into_iter().map(|row| (site.department(), row)).collect::<Vec<_>>())
    });
    Ok(try_join_all(scans).await?.into_iter().flatten().collect())
}

/// Department lookups for one batch of rows.
#[derive(Debug, Default)]
pub(super) struct Placements {
    classes: HashMap<String, Department>,
    students: HashMap<String, Department>,
}

impl Placements {
    /// Resolves the department of every row in `rows` with at most one
    /// student read and one class read across their partitions.
    pub(super) async fn resolve<E: Entity>(
        registry: &PartitionRegistry,
        rows: &[E],
        cancel: &CancellationToken,
    ) -> GatewayResult<Self> {
        let mut placements = Self::default();
        let mut class_ids: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<(String, String)> = Vec::new();

        match E::PLACEMENT {
            Placement::Stored => return Ok(placements),
            Placement::ByClass => {
                class_ids.extend(rows.iter().filter_map(|r| text_field(r, "class_id")));
            }
            Placement::ByStudent => {
                let ids: BTreeSet<String> = rows.iter().filter_map(|r| text_field(r, "student_id")).collect();
                if !ids.is_empty() {
                    for (department, student) in fetch(registry.students(), "student_id", &ids, cancel).await? {
                        match department {
                            Some(department) => {
                                placements.students.insert(student.student_id, department.clone());
                            }
                            None => {
                                class_ids.insert(student.class_id.clone());
                                pending.push((student.student_id, student.class_id));
                            }
                        }
                    }
                }
            }
        }

        if !class_ids.is_empty() {
            let classes: Vec<(Option<&Department>, ClassRecord)> =
                fetch(registry.classes(), "class_id", &class_ids, cancel).await?;
            placements.classes = classes
                .into_iter()
                .map(|(_, class)| (class.class_id, class.department))
                .collect();
        }
        for (student_id, class_id) in pending {
            if let Some(department) = placements.classes.get(&class_id) {
                placements.students.insert(student_id, department.clone());
            }
        }
        Ok(placements)
    }

    /// The department of `record`, if its class or student is known.
    pub(super) fn department_of<E: Entity>(&self, record: &E) -> Option<Department> {
        match E::PLACEMENT {
            Placement::Stored => text_field(record, DEPARTMENT_FIELD).and_then(|code| Department::parse(&code).ok()),
            Placement::ByClass => text_field(record, "class_id").and_then(|id| self.classes.get(&id).cloned()),
            Placement::ByStudent => text_field(record, "student_id").and_then(|id| self.students.get(&id).cloned()),
        }
    }
}

/// Whether `record`, placed in `department`, satisfies `filter`.
///
/// Department terms are settled against `department`; an unplaced row has
/// no department, so none of them hold.
pub(super) fn admits<E: Entity>(filter: &Predicate, department: Option<&Department>, record: &E) -> bool {
    filter
        .bind_field(DEPARTMENT_FIELD, &|value| {
            Some(department.is_some_and(|d| value.as_text() == Some(d.as_str())))
        })
        .matches(record)
}

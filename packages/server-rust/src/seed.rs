//! Bulk loading of fixture data straight into partition stores.
//!
//! Bypasses sagas and id generation: the seed must already be consistent.
//! Each row is routed by the department of its class, or for stage-2/3
//! scores by the department of the student's class.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use fragdb_core::{
    ClassRecord, Department, Entity, GatewayError, GatewayResult, Stage1Score, Stage23Score,
    StudentRecord,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::registry::{PartitionRegistry, TableSites};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub classes: Vec<ClassRecord>,
    pub students: Vec<StudentRecord>,
    pub stage1: Vec<Stage1Score>,
    pub stage23: Vec<Stage23Score>,
}

impl SeedData {
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a seed document.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }
}

/// Row counts written by [`load_seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub classes: usize,
    pub students: usize,
    pub stage1: usize,
    pub stage23: usize,
}

/// Inserts every row of `seed` into its owning partition.
///
/// # Errors
///
/// Fails on the first row whose class or student is not part of the seed,
/// whose department no partition serves, or whose insert fails.
pub async fn load_seed(
    registry: &PartitionRegistry,
    seed: &SeedData,
    cancel: &CancellationToken,
) -> GatewayResult<SeedSummary> {
    let class_departments: HashMap<&str, &Department> = seed
        .classes
        .iter()
        .map(|c| (c.class_id.as_str(), &c.department))
        .collect();
    let student_departments: HashMap<&str, &Department> = seed
        .students
        .iter()
        .filter_map(|s| {
            class_departments
                .get(s.class_id.as_str())
                .map(|d| (s.student_id.as_str(), *d))
        })
        .collect();

    for class in &seed.classes {
        insert_at(registry.classes(), &class.department, class.clone(), cancel).await?;
    }
    for student in &seed.students {
        let department = class_departments
            .get(student.class_id.as_str())
            .ok_or_else(|| {
                GatewayError::validation(format!(
                    "student {} references class {} outside the seed",
                    student.student_id, student.class_id
                ))
            })?;
        insert_at(registry.students(), department, student.clone(), cancel).await?;
    }
    for score in &seed.stage1 {
        // Stage-1 has a single whole-table partition.
        for site in registry.stage1().iter() {
            site.store()
                .insert(score.clone(), cancel)
                .await
                .map_err(|err| err.at(site.def()))?;
        }
    }
    for score in &seed.stage23 {
        let department = student_departments
            .get(score.student_id.as_str())
            .ok_or_else(|| {
                GatewayError::validation(format!(
                    "score {} references a student outside the seed",
                    score.key()
                ))
            })?;
        insert_at(registry.stage23(), department, score.clone(), cancel).await?;
    }

    let summary = SeedSummary {
        classes: seed.classes.len(),
        students: seed.students.len(),
        stage1: seed.stage1.len(),
        stage23: seed.stage23.len(),
    };
    tracing::info!(?summary, "seed loaded");
    Ok(summary)
}

async fn insert_at<E: Entity>(
    sites: &TableSites<E>,
    department: &Department,
    record: E,
    cancel: &CancellationToken,
) -> GatewayResult<()> {
    let site = sites.resolve(department)?;
    site.store()
        .insert(record, cancel)
        .await
        .map_err(|err| err.at(site.def()))
}

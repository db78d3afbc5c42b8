//! Gateway-side joins between logical tables.
//!
//! Sibling partitions of one table are unioned before they get here; these
//! functions only join *different* tables, by equality on the shared key.

use std::collections::HashMap;

use fragdb_core::score::ScoreTotal;
use fragdb_core::{Department, Entity, ScoreKey, Stage1Score, Stage23Score, StudentRecord};
use serde::Serialize;

use super::Tagged;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Drop rows without a match.
    Inner,
    /// Keep rows without a match, leaving the joined fields empty.
    LeftOuter,
}

/// A full score record: stage-1 joined with stage-2/3 and, optionally,
/// student identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub student_id: String,
    pub subject_id: String,
    pub full_name: Option<String>,
    pub department: Option<Department>,
    pub score1: Option<f64>,
    pub score2: Option<f64>,
    pub score3: Option<f64>,
}

impl ScoreRow {
    #[must_use]
    pub fn key(&self) -> ScoreKey {
        ScoreKey::new(self.student_id.clone(), self.subject_id.clone())
    }

    /// Exact sum of the three stages; missing stages count as zero.
    #[must_use]
    pub fn total(&self) -> ScoreTotal {
        ScoreTotal::of(self.score1, self.score2, self.score3)
    }

    #[must_use]
    pub fn average(&self) -> f64 {
        self.total().average()
    }
}

/// Left-outer join of stage-1 rows with stage-2/3 rows on (student, subject).
///
/// Output follows the order of `stage1`. A stage-2/3 row without a stage-1
/// partner is dropped.
#[must_use]
pub fn join_stages(stage1: Vec<Stage1Score>, stage23: Vec<Tagged<Stage23Score>>) -> Vec<ScoreRow> {
    let later: HashMap<ScoreKey, Tagged<Stage23Score>> = stage23
        .into_iter()
        .map(|tagged| (tagged.record.key(), tagged))
        .collect();

    stage1
        .into_iter()
        .map(|first| {
            let hit = later.get(&first.key());
            ScoreRow {
                full_name: None,
                department: hit.and_then(|t| t.department.clone()),
                score1: first.score1,
                score2: hit.and_then(|t| t.record.score2),
                score3: hit.and_then(|t| t.record.score3),
                student_id: first.student_id,
                subject_id: first.subject_id,
            }
        })
        .collect()
}

/// Joins score rows with student identity on student id.
///
/// A matched student's partition department replaces whatever department
/// the row carried.
#[must_use]
pub fn attach_students(
    rows: Vec<ScoreRow>,
    students: Vec<Tagged<StudentRecord>>,
    kind: JoinKind,
) -> Vec<ScoreRow> {
    let by_id: HashMap<String, Tagged<StudentRecord>> = students
        .into_iter()
        .map(|tagged| (tagged.record.key(), tagged))
        .collect();

    rows.into_iter()
        .filter_map(|mut row| match by_id.get(&row.student_id) {
            Some(student) => {
                row.full_name = Some(student.record.full_name.clone());
                if student.department.is_some() {
                    row.department.clone_from(&student.department);
                }
                Some(row)
            }
            None => (kind == JoinKind::LeftOuter).then_some(row),
        })
        .collect()
}

//! Aggregations over joined score rows.
//!
//! Always applied after the joins: partitions never see the combined
//! record, so none of this can be pushed down.

use std::collections::BTreeMap;

use fragdb_core::score::{hundredths, Histogram, ScoreTotal};
use fragdb_core::Department;
use serde::Serialize;

use super::join::ScoreRow;

/// Mean of `n` values summed in `unit`ths, e.g. hundredths of a score.
#[allow(clippy::cast_precision_loss)]
fn mean(sum: i64, n: usize, unit: f64) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum as f64 / unit / n as f64
    }
}

// ---------------------------------------------------------------------------
// Averages per subject and department
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectAverage {
    pub subject_id: String,
    pub department: Option<Department>,
    pub students: usize,
    pub avg_score1: f64,
    pub avg_score2: f64,
    pub avg_score3: f64,
    pub avg_total: f64,
}

/// Running sums in hundredths.
#[derive(Default)]
struct Sums {
    n: usize,
    score1: i64,
    score2: i64,
    score3: i64,
    total: i64,
}

/// One row per (subject, department), ordered by subject then department.
///
/// Missing stage values count as zero in every average.
#[must_use]
pub fn averages_by_subject(rows: &[ScoreRow]) -> Vec<SubjectAverage> {
    let mut groups: BTreeMap<(String, Option<Department>), Sums> = BTreeMap::new();
    for row in rows {
        let sums = groups
            .entry((row.subject_id.clone(), row.department.clone()))
            .or_default();
        sums.n += 1;
        sums.score1 += hundredths(row.score1.unwrap_or(0.0));
        sums.score2 += hundredths(row.score2.unwrap_or(0.0));
        sums.score3 += hundredths(row.score3.unwrap_or(0.0));
        sums.total += row.total().hundredths();
    }

    groups
        .into_iter()
        .map(|((subject_id, department), sums)| SubjectAverage {
            subject_id,
            department,
            students: sums.n,
            avg_score1: mean(sums.score1, sums.n, 100.0),
            avg_score2: mean(sums.score2, sums.n, 100.0),
            avg_score3: mean(sums.score3, sums.n, 100.0),
            avg_total: mean(sums.total, sums.n, 300.0),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Failing records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailingRecord {
    #[serde(flatten)]
    pub row: ScoreRow,
    pub average: f64,
}

/// Records whose per-record average is strictly below `threshold`, lowest
/// first.
#[must_use]
pub fn failures(rows: Vec<ScoreRow>, threshold: f64) -> Vec<FailingRecord> {
    let mut failing: Vec<(ScoreTotal, ScoreRow)> = rows
        .into_iter()
        .map(|row| (row.total(), row))
        .filter(|(total, _)| total.is_below(threshold))
        .collect();
    failing.sort_by(|(a_total, a), (b_total, b)| a_total.cmp(b_total).then_with(|| a.key().cmp(&b.key())));
    failing
        .into_iter()
        .map(|(total, row)| FailingRecord {
            average: total.average(),
            row,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentDistribution {
    pub department: Department,
    pub students: usize,
    pub average: f64,
    pub buckets: Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDistribution {
    pub subject_id: String,
    pub departments: Vec<DepartmentDistribution>,
}

/// Histogram of per-record averages for one subject, one entry per
/// department in `departments` (empty departments included).
pub fn distribution(
    subject_id: &str,
    rows: &[ScoreRow],
    departments: impl IntoIterator<Item = Department>,
) -> ScoreDistribution {
    let departments = departments
        .into_iter()
        .map(|department| {
            let totals: Vec<ScoreTotal> = rows
                .iter()
                .filter(|r| r.subject_id == subject_id && r.department.as_ref() == Some(&department))
                .map(ScoreRow::total)
                .collect();
            DepartmentDistribution {
                students: totals.len(),
                average: mean(totals.iter().map(|t| t.hundredths()).sum(), totals.len(), 300.0),
                buckets: totals.iter().copied().collect(),
                department,
            }
        })
        .collect();

    ScoreDistribution {
        subject_id: subject_id.to_string(),
        departments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dept;

    fn row(student: &str, subject: &str, code: &str, scores: [Option<f64>; 3]) -> ScoreRow {
        ScoreRow {
            student_id: student.to_string(),
            subject_id: subject.to_string(),
            full_name: None,
            department: Some(dept(code)),
            score1: scores[0],
            score2: scores[1],
            score3: scores[2],
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn averages_group_by_subject_and_department() {
        let rows = vec![
            row("SV001", "M01", "K1", [Some(7.5), Some(8.0), Some(8.5)]),
            row("SV002", "M01", "K1", [Some(7.5), None, None]),
            row("SV004", "M01", "K2", [Some(9.0), Some(9.0), Some(9.0)]),
        ];
        let averages = averages_by_subject(&rows);
        assert_eq!(averages.len(), 2);

        let k1 = &averages[0];
        assert_eq!(k1.department, Some(dept("K1")));
        assert_eq!(k1.students, 2);
        assert!(close(k1.avg_score1, 7.5));
        assert!(close(k1.avg_score2, 4.0));
        assert!(close(k1.avg_total, (8.0 + 2.5) / 2.0));
    }

    #[test]
    fn failures_sorted_lowest_first() {
        let rows = vec![
            row("SV001", "M01", "K1", [Some(7.5), Some(8.0), Some(8.5)]),
            row("SV002", "M01", "K1", [Some(7.5), None, None]),
            row("SV003", "M01", "K1", [Some(3.0), None, None]),
            row("SV004", "M01", "K2", [Some(5.0), Some(5.0), Some(5.0)]),
        ];
        let failing = failures(rows, 5.0);
        let ids: Vec<_> = failing.iter().map(|f| f.row.student_id.as_str()).collect();
        assert_eq!(ids, ["SV003", "SV002"]);
        assert!(close(failing[1].average, 2.5));
    }

    #[test]
    fn averages_on_a_boundary_are_exact() {
        let rows = vec![
            // (0.2 + 8.2 + 6.6) / 3 is exactly 5, and 19.5 / 3 exactly 6.5.
            row("SV001", "M01", "K1", [Some(0.2), Some(8.2), Some(6.6)]),
            row("SV002", "M01", "K1", [Some(6.1), Some(6.7), Some(6.7)]),
            row("SV003", "M01", "K1", [Some(4.9), Some(5.0), Some(5.0)]),
        ];

        let failing = failures(rows.clone(), 5.0);
        let ids: Vec<_> = failing.iter().map(|f| f.row.student_id.as_str()).collect();
        assert_eq!(ids, ["SV003"]);

        let dist = distribution("M01", &rows, [dept("K1")]);
        let k1 = &dist.departments[0];
        assert_eq!(k1.buckets.weak, 1);
        assert_eq!(k1.buckets.fair, 1);
        assert_eq!(k1.buckets.good, 1);
        assert!(close(k1.average, (15.0 + 19.5 + 14.9) / 9.0));
    }

    #[test]
    fn distribution_covers_every_department() {
        let rows = vec![
            row("SV001", "M01", "K1", [Some(6.5), Some(6.5), Some(6.5)]),
            row("SV002", "M01", "K1", [Some(9.0), Some(9.0), Some(9.0)]),
            row("SV003", "M02", "K1", [Some(1.0), None, None]),
        ];
        let dist = distribution("M01", &rows, [dept("K1"), dept("K2")]);
        assert_eq!(dist.departments.len(), 2);

        let k1 = &dist.departments[0];
        assert_eq!(k1.students, 2);
        assert!(close(k1.average, 7.75));
        assert_eq!(k1.buckets.good, 1);
        assert_eq!(k1.buckets.excellent, 1);

        let k2 = &dist.departments[1];
        assert_eq!(k2.students, 0);
        assert!(close(k2.average, 0.0));
        assert_eq!(k2.buckets.total(), 0);
    }
}

//! Partition layout and routing lookups.
//!
//! The gateway fronts a fixed set of partitions ("sites"), each serving one
//! logical table and one fragment of it. This module provides:
//!
//! - [`PartitionId`]: Identity of a partition
//! - [`Fragment`]: Which fragmentation key values a partition holds
//! - [`PartitionDef`]: Static description of one partition
//! - [`PartitionLayout`]: Immutable, validated lookup table over all partitions
//! - [`resolve_partition`] / [`candidate_partitions`]: Routing over any
//!   collection of partition-bearing values

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{Department, LogicalTable, DEPARTMENT_FIELD};
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{FieldValue, Predicate};

// ---------------------------------------------------------------------------
// PartitionId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Fragment
// ---------------------------------------------------------------------------

/// The fragmentation predicate of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fragment {
    /// Holds every record of its table.
    Whole,
    /// Holds records whose department is in the set.
    Departments(BTreeSet<Department>),
}

impl Fragment {
    /// Fragment holding exactly one department.
    #[must_use]
    pub fn single(department: Department) -> Self {
        Self::Departments(BTreeSet::from([department]))
    }

    #[must_use]
    pub fn admits(&self, department: &Department) -> bool {
        match self {
            Self::Whole => true,
            Self::Departments(set) => set.contains(department),
        }
    }

    /// True if no record in this fragment can have a department in `pinned`.
    #[must_use]
    pub fn disjoint_with(&self, pinned: &BTreeSet<String>) -> bool {
        match self {
            Self::Whole => pinned.is_empty(),
            Self::Departments(set) => !set.iter().any(|d| pinned.contains(d.as_str())),
        }
    }

    /// The department every record of this fragment has, if unique.
    #[must_use]
    pub fn sole_department(&self) -> Option<&Department> {
        match self {
            Self::Departments(set) if set.len() == 1 => set.iter().next(),
            _ => None,
        }
    }

    /// Settles an equality test on the department for every record held here.
    #[must_use]
    pub fn decide(&self, value: &FieldValue) -> Option<bool> {
        let Self::Departments(set) = self else {
            return None;
        };
        let Some(code) = value.as_text() else {
            return Some(false);
        };
        if !set.iter().any(|d| d.as_str() == code) {
            Some(false)
        } else if set.len() == 1 {
            Some(true)
        } else {
            None
        }
    }

    /// Rewrites `filter` for a sub-query sent to this fragment.
    #[must_use]
    pub fn bind(&self, filter: &Predicate) -> Predicate {
        filter.bind_field(DEPARTMENT_FIELD, &|value| self.decide(value))
    }
}

// ---------------------------------------------------------------------------
// PartitionDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDef {
    pub id: PartitionId,
    pub name: String,
    pub table: LogicalTable,
    pub fragment: Fragment,
}

impl PartitionDef {
    pub fn new(id: u32, name: impl Into<String>, table: LogicalTable, fragment: Fragment) -> Self {
        Self {
            id: PartitionId(id),
            name: name.into(),
            table,
            fragment,
        }
    }
}

impl AsRef<PartitionDef> for PartitionDef {
    fn as_ref(&self) -> &PartitionDef {
        self
    }
}

impl fmt::Display for PartitionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// The partition among `partitions` that owns records with `department`.
pub fn resolve_partition<'a, P>(
    partitions: impl IntoIterator<Item = &'a P>,
    department: &Department,
) -> Option<&'a P>
where
    P: AsRef<PartitionDef> + 'a,
{
    partitions
        .into_iter()
        .find(|p| p.as_ref().fragment.admits(department))
}

/// Every partition among `partitions` that may hold rows matching `filter`.
///
/// Without a department term in the filter this is all of them.
pub fn candidate_partitions<'a, P>(
    partitions: impl IntoIterator<Item = &'a P>,
    filter: &Predicate,
) -> Vec<&'a P>
where
    P: AsRef<PartitionDef> + 'a,
{
    let pinned = filter.pinned_values(DEPARTMENT_FIELD);
    partitions
        .into_iter()
        .filter(|p| {
            pinned
                .as_ref()
                .is_none_or(|set| !p.as_ref().fragment.disjoint_with(set))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// PartitionLayout
// ---------------------------------------------------------------------------

/// Immutable lookup table over every configured partition.
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    /// Sorted by id.
    partitions: Vec<PartitionDef>,
}

impl PartitionLayout {
    /// Validates and builds a layout.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if ids repeat, a table has no partition,
    /// a whole-table partition has siblings, a department partition lists no
    /// department, or sibling partitions share a department.
    pub fn new(mut partitions: Vec<PartitionDef>) -> GatewayResult<Self> {
        partitions.sort_by_key(|p| p.id);
        if let Some(pair) = partitions.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(GatewayError::validation(format!(
                "partition id {} is configured twice",
                pair[0].id
            )));
        }

        for table in LogicalTable::ALL {
            let siblings: Vec<&PartitionDef> =
                partitions.iter().filter(|p| p.table == table).collect();
            if siblings.is_empty() {
                return Err(GatewayError::validation(format!(
                    "no partition serves table {table}"
                )));
            }
            let mut seen: BTreeMap<&Department, PartitionId> = BTreeMap::new();
            for def in &siblings {
                match &def.fragment {
                    Fragment::Whole if siblings.len() > 1 => {
                        return Err(GatewayError::validation(format!(
                            "partition {def} holds all of {table} but has siblings"
                        )));
                    }
                    Fragment::Whole => {}
                    Fragment::Departments(set) if set.is_empty() => {
                        return Err(GatewayError::validation(format!(
                            "partition {def} lists no department"
                        )));
                    }
                    Fragment::Departments(set) => {
                        for dept in set {
                            if let Some(owner) = seen.insert(dept, def.id) {
                                return Err(GatewayError::validation(format!(
                                    "department {dept} of {table} is claimed by partitions {owner} and {}",
                                    def.id
                                )));
                            }
                        }
                    }
                }
            }
        }

        Ok(Self { partitions })
    }

    /// The seven-site deployment: classes, students and stage-2/3 scores
    /// split across departments `K1`/`K2`, stage-1 scores in one shared site.
    #[must_use]
    pub fn standard() -> Self {
        let k1 = || Fragment::single(Department("K1".to_string()));
        let k2 = || Fragment::single(Department("K2".to_string()));
        Self {
            partitions: vec![
                PartitionDef::new(1, "class-k1", LogicalTable::Class, k1()),
                PartitionDef::new(2, "class-k2", LogicalTable::Class, k2()),
                PartitionDef::new(3, "student-k1", LogicalTable::Student, k1()),
                PartitionDef::new(4, "student-k2", LogicalTable::Student, k2()),
                PartitionDef::new(5, "score-stage1", LogicalTable::ScoreStage1, Fragment::Whole),
                PartitionDef::new(6, "score-stage23-k1", LogicalTable::ScoreStage23, k1()),
                PartitionDef::new(7, "score-stage23-k2", LogicalTable::ScoreStage23, k2()),
            ],
        }
    }

    #[must_use]
    pub fn partitions(&self) -> &[PartitionDef] {
        &self.partitions
    }

    #[must_use]
    pub fn get(&self, id: PartitionId) -> Option<&PartitionDef> {
        self.partitions
            .binary_search_by_key(&id, |p| p.id)
            .ok()
            .map(|idx| &self.partitions[idx])
    }

    pub fn for_table(&self, table: LogicalTable) -> impl Iterator<Item = &PartitionDef> {
        self.partitions.iter().filter(move |p| p.table == table)
    }

    /// The partition of `table` owning records of `department`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if no partition of `table` admits `department`.
    pub fn resolve(&self, table: LogicalTable, department: &Department) -> GatewayResult<&PartitionDef> {
        resolve_partition(self.for_table(table), department).ok_or_else(|| {
            GatewayError::validation(format!(
                "department {department} is not served by any {table} partition"
            ))
        })
    }

    #[must_use]
    pub fn candidates(&self, table: LogicalTable, filter: &Predicate) -> Vec<&PartitionDef> {
        candidate_partitions(self.for_table(table), filter)
    }

    /// Every department named by any partition.
    #[must_use]
    pub fn departments(&self) -> BTreeSet<Department> {
        self.partitions
            .iter()
            .filter_map(|p| match &p.fragment {
                Fragment::Departments(set) => Some(set.iter().cloned()),
                Fragment::Whole => None,
            })
            .flatten()
            .collect()
    }

    /// Parses `raw` and checks the layout serves it.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` for malformed or unknown departments.
    pub fn department(&self, raw: &str) -> GatewayResult<Department> {
        let dept = Department::parse(raw)?;
        if self.departments().contains(&dept) {
            Ok(dept)
        } else {
            Err(GatewayError::validation(format!("unknown department {dept}")))
        }
    }
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(code: &str) -> Department {
        Department::parse(code).unwrap()
    }

    fn ids(defs: &[&PartitionDef]) -> Vec<u32> {
        defs.iter().map(|d| d.id.0).collect()
    }

    #[test]
    fn standard_layout_validates() {
        let standard = PartitionLayout::standard();
        let rebuilt = PartitionLayout::new(standard.partitions().to_vec()).unwrap();
        assert_eq!(rebuilt, standard);
        assert_eq!(standard.departments().len(), 2);
    }

    #[test]
    fn resolve_routes_each_department_to_exactly_one_partition() {
        let layout = PartitionLayout::standard();
        for table in [LogicalTable::Class, LogicalTable::Student, LogicalTable::ScoreStage23] {
            for code in ["K1", "K2"] {
                let d = dept(code);
                let owner = layout.resolve(table, &d).unwrap();
                let admitting: Vec<_> = layout
                    .for_table(table)
                    .filter(|p| p.fragment.admits(&d))
                    .collect();
                assert_eq!(admitting, vec![owner]);
            }
        }
        assert_eq!(
            layout.resolve(LogicalTable::ScoreStage1, &dept("K2")).unwrap().id,
            PartitionId(5)
        );
    }

    #[test]
    fn resolve_unknown_department_fails() {
        let layout = PartitionLayout::standard();
        let err = layout.resolve(LogicalTable::Student, &dept("K9")).unwrap_err();
        assert!(matches!(err, GatewayError::ValidationFailed { .. }));
        assert!(layout.department("k9").is_err());
        assert_eq!(layout.department("k1").unwrap(), dept("K1"));
    }

    #[test]
    fn candidates_prune_on_pinned_department() {
        let layout = PartitionLayout::standard();
        let pinned = Predicate::eq(DEPARTMENT_FIELD, "K2");
        assert_eq!(ids(&layout.candidates(LogicalTable::Student, &pinned)), vec![4]);

        let open = Predicate::contains("full_name", "an");
        assert_eq!(ids(&layout.candidates(LogicalTable::Student, &open)), vec![3, 4]);

        // The shared stage-1 partition can never be pruned by department.
        assert_eq!(ids(&layout.candidates(LogicalTable::ScoreStage1, &pinned)), vec![5]);

        let nothing = Predicate::eq(DEPARTMENT_FIELD, "K7");
        assert!(layout.candidates(LogicalTable::Class, &nothing).is_empty());
    }

    #[test]
    fn many_to_one_fragment_keeps_undecided_terms() {
        let shared = Fragment::Departments(BTreeSet::from([dept("K1"), dept("K3")]));
        let filter = Predicate::eq(DEPARTMENT_FIELD, "K1");
        assert_eq!(shared.bind(&filter), filter);
        assert_eq!(shared.bind(&Predicate::eq(DEPARTMENT_FIELD, "K2")), Predicate::False);
        assert_eq!(Fragment::single(dept("K1")).bind(&filter), Predicate::True);
        assert_eq!(Fragment::Whole.bind(&filter), filter);
    }

    #[test]
    fn rejects_overlapping_siblings() {
        let mut defs = PartitionLayout::standard().partitions().to_vec();
        defs[1].fragment = Fragment::single(dept("K1"));
        let err = PartitionLayout::new(defs).unwrap_err();
        assert!(err.to_string().contains("claimed by partitions 1 and 2"));
    }

    #[test]
    fn rejects_missing_table_and_duplicate_ids() {
        let defs: Vec<_> = PartitionLayout::standard()
            .partitions()
            .iter()
            .filter(|p| p.table != LogicalTable::ScoreStage1)
            .cloned()
            .collect();
        assert!(PartitionLayout::new(defs).is_err());

        let mut dup = PartitionLayout::standard().partitions().to_vec();
        dup[6].id = PartitionId(6);
        assert!(PartitionLayout::new(dup).is_err());
    }

    #[test]
    fn rejects_whole_partition_with_siblings() {
        let mut defs = PartitionLayout::standard().partitions().to_vec();
        defs.push(PartitionDef::new(
            8,
            "score-stage1-b",
            LogicalTable::ScoreStage1,
            Fragment::single(dept("K1")),
        ));
        assert!(PartitionLayout::new(defs).is_err());
    }
}

//! Filter predicates, sorting and paging for partition scans.
//!
//! Predicates are evaluated against [`Entity::field`] values. The router
//! inspects them for terms on the fragmentation key ([`Predicate::pinned_values`])
//! and binds those terms against a partition's fragment before the sub-query
//! is sent ([`Predicate::bind_field`]).

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl FieldValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Orders values of the same kind. Text and numbers are not comparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Number(a), Self::Number(b)) => Some(a.total_cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A filter over entity fields.
///
/// A missing field never satisfies `Eq`, `In`, `Compare` or `Contains`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    Eq { field: String, value: FieldValue },
    In { field: String, values: Vec<FieldValue> },
    Compare { field: String, op: CompareOp, value: FieldValue },
    /// Case-insensitive substring match on a text field.
    Contains { field: String, needle: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op: CompareOp::Gte,
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op: CompareOp::Lt,
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    /// Conjunction of the given terms; `True` when empty.
    #[must_use]
    pub fn all(terms: Vec<Predicate>) -> Self {
        Self::And(terms).simplify()
    }

    /// Disjunction of the given terms; `False` when empty.
    #[must_use]
    pub fn any(terms: Vec<Predicate>) -> Self {
        Self::Or(terms).simplify()
    }

    /// Evaluates the predicate against one record.
    pub fn matches<E: Entity>(&self, record: &E) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Eq { field, value } => record.field(field).is_some_and(|v| &v == value),
            Self::In { field, values } => record
                .field(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == &v)),
            Self::Compare { field, op, value } => record
                .field(field)
                .and_then(|v| v.compare(value))
                .is_some_and(|ordering| op.holds(ordering)),
            Self::Contains { field, needle } => record.field(field).is_some_and(|v| {
                v.as_text()
                    .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase()))
            }),
            Self::And(terms) => terms.iter().all(|t| t.matches(record)),
            Self::Or(terms) => terms.iter().any(|t| t.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }

    /// Text values this predicate restricts `field` to, if it restricts it at all.
    ///
    /// `None` means every value of `field` may match. `Some(empty)` means no
    /// record can match.
    #[must_use]
    pub fn pinned_values(&self, field: &str) -> Option<BTreeSet<String>> {
        match self {
            Self::False => Some(BTreeSet::new()),
            Self::Eq { field: f, value } if f == field => {
                Some(value.as_text().map(str::to_string).into_iter().collect())
            }
            Self::In { field: f, values } if f == field => Some(
                values
                    .iter()
                    .filter_map(FieldValue::as_text)
                    .map(str::to_string)
                    .collect(),
            ),
            Self::And(terms) => terms
                .iter()
                .filter_map(|t| t.pinned_values(field))
                .reduce(|acc, next| acc.intersection(&next).cloned().collect()),
            Self::Or(terms) => {
                let mut union = BTreeSet::new();
                for term in terms {
                    union.extend(term.pinned_values(field)?);
                }
                Some(union)
            }
            _ => None,
        }
    }

    /// Replaces `Eq`/`In` terms on `field` with constants where `decide`
    /// can settle them, then simplifies.
    ///
    /// `decide` returns `Some(true)` if every record the caller holds has that
    /// value, `Some(false)` if none does, `None` when undecidable.
    #[must_use]
    pub fn bind_field(&self, field: &str, decide: &dyn Fn(&FieldValue) -> Option<bool>) -> Self {
        let bound = match self {
            Self::Eq { field: f, value } if f == field => match decide(value) {
                Some(true) => Self::True,
                Some(false) => Self::False,
                None => self.clone(),
            },
            Self::In { field: f, values } if f == field => {
                let verdicts: Vec<Option<bool>> = values.iter().map(decide).collect();
                if verdicts.contains(&Some(true)) {
                    Self::True
                } else if verdicts.iter().all(|v| *v == Some(false)) {
                    Self::False
                } else {
                    self.clone()
                }
            }
            Self::And(terms) => Self::And(terms.iter().map(|t| t.bind_field(field, decide)).collect()),
            Self::Or(terms) => Self::Or(terms.iter().map(|t| t.bind_field(field, decide)).collect()),
            Self::Not(inner) => Self::Not(Box::new(inner.bind_field(field, decide))),
            other => other.clone(),
        };
        bound.simplify()
    }

    /// Whether any term tests `field`.
    #[must_use]
    pub fn mentions(&self, field: &str) -> bool {
        match self {
            Self::True | Self::False => false,
            Self::Eq { field: f, .. }
            | Self::In { field: f, .. }
            | Self::Compare { field: f, .. }
            | Self::Contains { field: f, .. } => f == field,
            Self::And(terms) | Self::Or(terms) => terms.iter().any(|t| t.mentions(field)),
            Self::Not(inner) => inner.mentions(field),
        }
    }

    /// Drops every term on `field`, widening the predicate: a record that
    /// matches `self` also matches the result.
    #[must_use]
    pub fn relax_field(&self, field: &str) -> Self {
        self.relax(field, true).simplify()
    }

    fn relax(&self, field: &str, positive: bool) -> Self {
        match self {
            Self::Eq { field: f, .. }
            | Self::In { field: f, .. }
            | Self::Compare { field: f, .. }
            | Self::Contains { field: f, .. }
                if f == field =>
            {
                if positive {
                    Self::True
                } else {
                    Self::False
                }
            }
            Self::And(terms) => Self::And(terms.iter().map(|t| t.relax(field, positive)).collect()),
            Self::Or(terms) => Self::Or(terms.iter().map(|t| t.relax(field, positive)).collect()),
            Self::Not(inner) => Self::Not(Box::new(inner.relax(field, !positive))),
            other => other.clone(),
        }
    }

    /// Folds constant terms out of `And`, `Or` and `Not`.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self {
            Self::And(terms) => {
                let mut kept = Vec::with_capacity(terms.len());
                for term in terms.into_iter().map(Self::simplify) {
                    match term {
                        Self::True => {}
                        Self::False => return Self::False,
                        other => kept.push(other),
                    }
                }
                match kept.len() {
                    0 => Self::True,
                    1 => kept.remove(0),
                    _ => Self::And(kept),
                }
            }
            Self::Or(terms) => {
                let mut kept = Vec::with_capacity(terms.len());
                for term in terms.into_iter().map(Self::simplify) {
                    match term {
                        Self::False => {}
                        Self::True => return Self::True,
                        other => kept.push(other),
                    }
                }
                match kept.len() {
                    0 => Self::False,
                    1 => kept.remove(0),
                    _ => Self::Or(kept),
                }
            }
            Self::Not(inner) => match inner.simplify() {
                Self::True => Self::False,
                Self::False => Self::True,
                other => Self::Not(Box::new(other)),
            },
            other => other,
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::True
    }
}

// ---------------------------------------------------------------------------
// Sorting and paging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// Orders two records by `sort`, falling back to primary key.
///
/// Records missing the sort field come last in either direction.
pub fn compare_records<E: Entity>(a: &E, b: &E, sort: Option<&SortSpec>) -> Ordering {
    let by_field = sort.map_or(Ordering::Equal, |spec| {
        match (a.field(&spec.field), b.field(&spec.field)) {
            (Some(x), Some(y)) => {
                let ordering = x.compare(&y).unwrap_or(Ordering::Equal);
                match spec.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
    by_field.then_with(|| a.key().cmp(&b.key()))
}

/// A `skip`/`take` window over an ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub take: Option<usize>,
}

impl Page {
    /// Every row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(skip: usize, take: usize) -> Self {
        Self {
            skip,
            take: Some(take),
        }
    }

    /// One-based page number with a fixed page size. Page 0 is treated as 1.
    #[must_use]
    pub fn numbered(page: usize, size: usize) -> Self {
        Self::new(page.saturating_sub(1).saturating_mul(size), size)
    }

    #[must_use]
    pub fn first(take: usize) -> Self {
        Self::new(0, take)
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.skip == 0 && self.take.is_none()
    }

    /// The number of leading rows a partition must return so the window can
    /// be cut after a merge.
    #[must_use]
    pub fn prefix(&self) -> Self {
        Self {
            skip: 0,
            take: self.take.map(|take| self.skip.saturating_add(take)),
        }
    }

    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let window = rows.into_iter().skip(self.skip);
        match self.take {
            Some(take) => window.take(take).collect(),
            None => window.collect(),
        }
    }
}

/// A sub-query sent to one partition.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub filter: Predicate,
    pub sort: Option<SortSpec>,
    pub page: Page,
}

impl ScanRequest {
    #[must_use]
    pub fn filtered(filter: Predicate) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }
}

//! Scatter-gather query engine.
//!
//! Three stages, each with its own types:
//!
//! 1. **Scatter** ([`ScatterGather::scatter`]): candidate partitions from the
//!    router, the filter bound to each partition's fragment, sub-queries
//!    issued concurrently. One failed sub-query fails the whole read.
//! 2. **Join** ([`join`]): sibling partitions were already unioned; rows of
//!    different tables are joined by key at the gateway.
//! 3. **Aggregate** ([`aggregate`]): averages, failures and histograms over
//!    the joined rows.

pub mod aggregate;
pub mod join;
mod placement;

use std::collections::BTreeSet;
use std::sync::Arc;

use fragdb_core::filter::compare_records;
use fragdb_core::{
    Department, Entity, Fragment, GatewayResult, Page, PartitionId, Placement, Predicate, ScanRequest,
    SortSpec, Stage1Score, Stage23Score, StudentRecord, DEPARTMENT_FIELD,
};
use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;

pub use self::join::{JoinKind, ScoreRow};
use self::join::{attach_students, join_stages};
use self::placement::{admits, Placements};
use crate::registry::{PartitionRegistry, Site, TableSlot};

/// A gathered row and the partition it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<E> {
    pub partition: PartitionId,
    /// The source partition's department when it holds exactly one,
    /// otherwise the department resolved through the row's class or student.
    pub department: Option<Department>,
    pub record: E,
}

/// One partition's share of a scatter.
struct SiteQuery<'a, E: Entity> {
    site: &'a Site<E>,
    /// The request filter bound to the partition's fragment.
    filter: Predicate,
    /// Department terms remain that the partition cannot evaluate on rows
    /// without a department column.
    residual: bool,
}

/// Parameters of a joined score read.
#[derive(Debug, Clone)]
pub struct ScoreQuery {
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub department: Option<Department>,
    pub student_join: JoinKind,
    /// Window over the joined rows, ordered by (student, subject).
    pub page: Page,
}

impl Default for ScoreQuery {
    fn default() -> Self {
        Self {
            student_id: None,
            subject_id: None,
            department: None,
            student_join: JoinKind::LeftOuter,
            page: Page::all(),
        }
    }
}

/// Fans reads out over the partitions of a registry.
#[derive(Clone)]
pub struct ScatterGather {
    registry: Arc<PartitionRegistry>,
}

impl ScatterGather {
    #[must_use]
    pub fn new(registry: Arc<PartitionRegistry>) -> Self {
        Self { registry }
    }

    /// The candidate partitions of `E`'s table for `filter`, each with the
    /// filter bound to its fragment. Partitions the binding rules out are
    /// dropped.
    fn plan<E: Entity>(&self, filter: &Predicate) -> Vec<SiteQuery<'_, E>>
    where
        PartitionRegistry: TableSlot<E>,
    {
        self.registry
            .table::<E>()
            .candidates(filter)
            .into_iter()
            .map(|site| {
                let bound = site.def().fragment.bind(filter);
                let residual = E::PLACEMENT != Placement::Stored && bound.mentions(DEPARTMENT_FIELD);
                SiteQuery {
                    site,
                    filter: bound,
                    residual,
                }
            })
            .filter(|query| query.filter != Predicate::False)
            .collect()
    }

    /// Reads one partition's share and tags every row with its department.
    ///
    /// A residual query is sent without its department terms and without
    /// paging; rows are placed and filtered here instead.
    async fn gather<E: Entity>(
        &self,
        query: &SiteQuery<'_, E>,
        sort: Option<&SortSpec>,
        page: Page,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<Tagged<E>>> {
        let site = query.site;
        let sub = if query.residual {
            ScanRequest {
                filter: query.filter.relax_field(DEPARTMENT_FIELD),
                sort: sort.cloned(),
                page: Page::all(),
            }
        } else {
            ScanRequest {
                filter: query.filter.clone(),
                sort: sort.cloned(),
                page,
            }
        };
        let rows = site
            .store()
            .scan(&sub, cancel)
            .await
            .map_err(|err| err.at(site.def()))?;

        let shared = site.department().cloned();
        let placements = if shared.is_none()
            && (query.residual || matches!(site.def().fragment, Fragment::Departments(_)))
        {
            Some(Placements::resolve(&self.registry, &rows, cancel).await?)
        } else {
            None
        };

        Ok(rows
            .into_iter()
            .filter_map(|record| {
                let department = shared
                    .clone()
                    .or_else(|| placements.as_ref().and_then(|p| p.department_of(&record)));
                if query.residual && !admits(&query.filter, department.as_ref(), &record) {
                    return None;
                }
                Some(Tagged {
                    partition: site.id(),
                    department,
                    record,
                })
            })
            .collect())
    }

    /// Runs `request` against every candidate partition of `E`'s table and
    /// merges the results in `request.sort` order (primary key otherwise).
    ///
    /// A single candidate that can settle the whole filter receives the page
    /// as is. Otherwise each candidate returns the prefix covering the page,
    /// which is cut after the merge.
    ///
    /// # Errors
    ///
    /// Fails if any sub-query fails.
    pub async fn scatter<E: Entity>(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<Tagged<E>>>
    where
        PartitionRegistry: TableSlot<E>,
    {
        let targets = self.plan::<E>(&request.filter);
        let exact = matches!(targets.as_slice(), [only] if !only.residual);
        let page = if exact {
            request.page
        } else {
            request.page.prefix()
        };
        tracing::debug!(
            table = %E::TABLE,
            partitions = targets.len(),
            residual = targets.iter().filter(|t| t.residual).count(),
            pushed_page = exact,
            "scatter"
        );

        let reads = targets
            .iter()
            .map(|target| self.gather(target, request.sort.as_ref(), page, cancel));
        let mut merged: Vec<Tagged<E>> = try_join_all(reads).await?.into_iter().flatten().collect();
        merged.sort_by(|a, b| compare_records(&a.record, &b.record, request.sort.as_ref()));
        Ok(if exact {
            merged
        } else {
            request.page.apply(merged)
        })
    }

    /// [`scatter`](Self::scatter) without the partition tags.
    ///
    /// # Errors
    ///
    /// Fails if any sub-query fails.
    pub async fn union<E: Entity>(
        &self,
        request: &ScanRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<E>>
    where
        PartitionRegistry: TableSlot<E>,
    {
        Ok(self
            .scatter(request, cancel)
            .await?
            .into_iter()
            .map(|t| t.record)
            .collect())
    }

    /// The first `n` rows matching `filter` in `sort` order across all
    /// partitions. Each partition is asked for its own top `n` first.
    ///
    /// # Errors
    ///
    /// Fails if any sub-query fails.
    pub async fn top_n<E: Entity>(
        &self,
        filter: Predicate,
        sort: SortSpec,
        n: usize,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<Tagged<E>>>
    where
        PartitionRegistry: TableSlot<E>,
    {
        let request = ScanRequest::filtered(filter)
            .with_sort(sort)
            .with_page(Page::first(n));
        self.scatter(&request, cancel).await
    }

    /// Rows matching `filter`, summed over the candidate partitions.
    ///
    /// # Errors
    ///
    /// Fails if any partition count fails.
    pub async fn count<E: Entity>(
        &self,
        filter: &Predicate,
        cancel: &CancellationToken,
    ) -> GatewayResult<usize>
    where
        PartitionRegistry: TableSlot<E>,
    {
        let counts = self.plan::<E>(filter).into_iter().map(|query| async move {
            if query.residual {
                return Ok(self.gather(&query, None, Page::all(), cancel).await?.len());
            }
            query
                .site
                .store()
                .count(&query.filter, cancel)
                .await
                .map_err(|err| err.at(query.site.def()))
        });
        Ok(try_join_all(counts).await?.into_iter().sum())
    }

    /// Stage-1 left-outer-joined with stage-2/3, then joined with student
    /// identity as `query.student_join` says.
    ///
    /// Stage-1 and stage-2/3 are read concurrently. Students are fetched by
    /// the ids the stage-1 read produced. Without a department the page is
    /// pushed to the stage-1 partition; with one, it is cut after the
    /// department filter.
    ///
    /// # Errors
    ///
    /// Fails if any partition read fails.
    pub async fn score_rows(
        &self,
        query: &ScoreQuery,
        cancel: &CancellationToken,
    ) -> GatewayResult<Vec<ScoreRow>> {
        let mut key_terms = Vec::new();
        if let Some(student_id) = &query.student_id {
            key_terms.push(Predicate::eq("student_id", student_id.as_str()));
        }
        if let Some(subject_id) = &query.subject_id {
            key_terms.push(Predicate::eq("subject_id", subject_id.as_str()));
        }

        let late_page = query.department.is_some();
        let stage1_request = ScanRequest::filtered(Predicate::all(key_terms.clone()))
            .with_page(if late_page { Page::all() } else { query.page });

        let mut stage23_terms = key_terms;
        if let Some(department) = &query.department {
            stage23_terms.push(Predicate::eq(DEPARTMENT_FIELD, department.as_str()));
        }
        let stage23_request = ScanRequest::filtered(Predicate::all(stage23_terms));

        let (first, later) = futures_util::try_join!(
            self.union::<Stage1Score>(&stage1_request, cancel),
            self.scatter::<Stage23Score>(&stage23_request, cancel),
        )?;

        let ids: BTreeSet<&str> = first.iter().map(|s| s.student_id.as_str()).collect();
        let students = if ids.is_empty() {
            Vec::new()
        } else {
            let mut terms = vec![Predicate::is_in("student_id", ids)];
            if let Some(department) = &query.department {
                terms.push(Predicate::eq(DEPARTMENT_FIELD, department.as_str()));
            }
            self.scatter::<StudentRecord>(&ScanRequest::filtered(Predicate::all(terms)), cancel)
                .await?
        };

        let mut rows = attach_students(join_stages(first, later), students, query.student_join);
        if let Some(department) = &query.department {
            rows.retain(|row| row.department.as_ref() == Some(department));
            rows = query.page.apply(rows);
        }
        Ok(rows)
    }
}

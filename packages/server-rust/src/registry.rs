//! Partition registry: the router from logical tables to partition stores.
//!
//! [`PartitionRegistry`] pairs the static [`PartitionLayout`] with a store per
//! partition. It is built once at startup, never mutated, and handed to every
//! component by `Arc`. Routing questions are answered per table by
//! [`TableSites`]:
//!
//! - [`TableSites::resolve`]: the one partition owning a department
//! - [`TableSites::candidates`]: partitions not provably disjoint with a filter
//! - [`TableSites::lookup_key_owner`]: parallel lookup of a key on every partition

use std::collections::BTreeMap;
use std::sync::Arc;

use fragdb_core::partition::{candidate_partitions, resolve_partition};
use fragdb_core::{
    ClassRecord, Department, Entity, GatewayError, GatewayResult, LogicalTable, PartitionDef,
    PartitionId, PartitionLayout, Predicate, Stage1Score, Stage23Score, StudentRecord,
};
use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::storage::{MemoryPartition, PartitionStore};

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A partition definition bound to its store.
pub struct Site<E: Entity> {
    def: PartitionDef,
    store: Arc<dyn PartitionStore<E>>,
}

impl<E: Entity> Site<E> {
    #[must_use]
    pub fn new(def: PartitionDef, store: Arc<dyn PartitionStore<E>>) -> Self {
        Self { def, store }
    }

    #[must_use]
    pub fn def(&self) -> &PartitionDef {
        &self.def
    }

    #[must_use]
    pub fn id(&self) -> PartitionId {
        self.def.id
    }

    #[must_use]
    pub fn store(&self) -> &dyn PartitionStore<E> {
        self.store.as_ref()
    }

    /// The department of every row held here, when the fragment names just one.
    #[must_use]
    pub fn department(&self) -> Option<&Department> {
        self.def.fragment.sole_department()
    }
}

impl<E: Entity> AsRef<PartitionDef> for Site<E> {
    fn as_ref(&self) -> &PartitionDef {
        &self.def
    }
}

/// A record together with the partition it was found on.
pub struct Located<'a, E: Entity> {
    pub site: &'a Site<E>,
    pub record: E,
}

impl<E: Entity> Located<'_, E> {
    #[must_use]
    pub fn department(&self) -> Option<&Department> {
        self.site.department()
    }
}

// ---------------------------------------------------------------------------
// TableSites
// ---------------------------------------------------------------------------

/// All partitions of one logical table, in id order.
pub struct TableSites<E: Entity> {
    sites: Vec<Site<E>>,
}

impl<E: Entity> TableSites<E> {
    pub fn iter(&self) -> impl Iterator<Item = &Site<E>> {
        self.sites.iter()
    }

    #[must_use]
    pub fn get(&self, id: PartitionId) -> Option<&Site<E>> {
        self.sites.iter().find(|s| s.id() == id)
    }

    /// The partition owning rows of `department`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if no partition admits `department`.
    pub fn resolve(&self, department: &Department) -> GatewayResult<&Site<E>> {
        resolve_partition(&self.sites, department).ok_or_else(|| {
            GatewayError::validation(format!(
                "department {department} is not served by any {} partition",
                E::TABLE
            ))
        })
    }

    #[must_use]
    pub fn candidates(&self, filter: &Predicate) -> Vec<&Site<E>> {
        candidate_partitions(&self.sites, filter)
    }

    /// Looks `key` up on every partition concurrently and returns the first
    /// hit in partition order.
    ///
    /// # Errors
    ///
    /// Fails if any lookup fails, even when another partition holds the key.
    pub async fn lookup_key_owner(
        &self,
        key: &E::Key,
        cancel: &CancellationToken,
    ) -> GatewayResult<Option<Located<'_, E>>> {
        let lookups = self.sites.iter().map(|site| async move {
            site.store()
                .get(key, cancel)
                .await
                .map(|hit| hit.map(|record| Located { site, record }))
                .map_err(|err| err.at(site.def()))
        });
        let hits = try_join_all(lookups).await?;
        Ok(hits.into_iter().flatten().next())
    }
}

// ---------------------------------------------------------------------------
// StoreSet
// ---------------------------------------------------------------------------

/// Stores keyed by partition id, one map per logical table.
#[derive(Default)]
pub struct StoreSet {
    pub classes: BTreeMap<PartitionId, Arc<dyn PartitionStore<ClassRecord>>>,
    pub students: BTreeMap<PartitionId, Arc<dyn PartitionStore<StudentRecord>>>,
    pub stage1: BTreeMap<PartitionId, Arc<dyn PartitionStore<Stage1Score>>>,
    pub stage23: BTreeMap<PartitionId, Arc<dyn PartitionStore<Stage23Score>>>,
}

impl StoreSet {
    /// An empty [`MemoryPartition`] for every partition of `layout`.
    #[must_use]
    pub fn in_memory(layout: &PartitionLayout) -> Self {
        let mut set = Self::default();
        for def in layout.partitions() {
            match def.table {
                LogicalTable::Class => {
                    set.classes.insert(def.id, Arc::new(MemoryPartition::new()));
                }
                LogicalTable::Student => {
                    set.students.insert(def.id, Arc::new(MemoryPartition::new()));
                }
                LogicalTable::ScoreStage1 => {
                    set.stage1.insert(def.id, Arc::new(MemoryPartition::new()));
                }
                LogicalTable::ScoreStage23 => {
                    set.stage23.insert(def.id, Arc::new(MemoryPartition::new()));
                }
            }
        }
        set
    }
}

fn bind_sites<E: Entity>(
    layout: &PartitionLayout,
    mut stores: BTreeMap<PartitionId, Arc<dyn PartitionStore<E>>>,
) -> GatewayResult<TableSites<E>> {
    let mut sites = Vec::new();
    for def in layout.for_table(E::TABLE) {
        let store = stores.remove(&def.id).ok_or_else(|| {
            GatewayError::validation(format!("no store attached to partition {def}"))
        })?;
        sites.push(Site::new(def.clone(), store));
    }
    if let Some(stray) = stores.keys().next() {
        return Err(GatewayError::validation(format!(
            "store attached to partition {stray}, which is not a {} partition",
            E::TABLE
        )));
    }
    Ok(TableSites { sites })
}

// ---------------------------------------------------------------------------
// PartitionRegistry
// ---------------------------------------------------------------------------

/// Typed access to the sites of one logical table.
pub trait TableSlot<E: Entity> {
    fn slot(&self) -> &TableSites<E>;
}

/// Immutable routing table over every partition and its store.
pub struct PartitionRegistry {
    layout: PartitionLayout,
    classes: TableSites<ClassRecord>,
    students: TableSites<StudentRecord>,
    stage1: TableSites<Stage1Score>,
    stage23: TableSites<Stage23Score>,
}

impl PartitionRegistry {
    /// Binds `stores` to the partitions of `layout`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if a partition has no store or a store is
    /// attached to an id that is not a partition of its table.
    pub fn new(layout: PartitionLayout, stores: StoreSet) -> GatewayResult<Self> {
        Ok(Self {
            classes: bind_sites(&layout, stores.classes)?,
            students: bind_sites(&layout, stores.students)?,
            stage1: bind_sites(&layout, stores.stage1)?,
            stage23: bind_sites(&layout, stores.stage23)?,
            layout,
        })
    }

    /// A registry whose partitions are all empty in-memory stores.
    ///
    /// # Errors
    ///
    /// Never fails for a validated layout; kept fallible to share `new`.
    pub fn in_memory(layout: PartitionLayout) -> GatewayResult<Self> {
        let stores = StoreSet::in_memory(&layout);
        Self::new(layout, stores)
    }

    #[must_use]
    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<&PartitionDef> {
        self.layout.get(id)
    }

    #[must_use]
    pub fn table<E: Entity>(&self) -> &TableSites<E>
    where
        Self: TableSlot<E>,
    {
        self.slot()
    }

    #[must_use]
    pub fn classes(&self) -> &TableSites<ClassRecord> {
        &self.classes
    }

    #[must_use]
    pub fn students(&self) -> &TableSites<StudentRecord> {
        &self.students
    }

    #[must_use]
    pub fn stage1(&self) -> &TableSites<Stage1Score> {
        &self.stage1
    }

    #[must_use]
    pub fn stage23(&self) -> &TableSites<Stage23Score> {
        &self.stage23
    }
}

impl TableSlot<ClassRecord> for PartitionRegistry {
    fn slot(&self) -> &TableSites<ClassRecord> {
        &self.classes
    }
}

impl TableSlot<StudentRecord> for PartitionRegistry {
    fn slot(&self) -> &TableSites<StudentRecord> {
        &self.students
    }
}

impl TableSlot<Stage1Score> for PartitionRegistry {
    fn slot(&self) -> &TableSites<Stage1Score> {
        &self.stage1
    }
}

impl TableSlot<Stage23Score> for PartitionRegistry {
    fn slot(&self) -> &TableSites<Stage23Score> {
        &self.stage23
    }
}

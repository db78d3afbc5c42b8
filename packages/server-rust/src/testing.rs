//! Shared fixtures for unit tests: a registry whose every partition can be
//! told to fail, plus a small seeded dataset.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fragdb_core::{
    ClassRecord, Department, Entity, Fragment, LogicalTable, PartitionDef, PartitionId,
    PartitionLayout, Predicate, ScanRequest, ScoreKey, Stage1Score, Stage23Score, StudentRecord,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::registry::{PartitionRegistry, StoreSet};
use crate::saga::SagaOrchestrator;
use crate::seed::{load_seed, SeedData};
use crate::service::{GatewayConfig, GatewayContext};
use crate::storage::{MemoryPartition, Mutator, PartitionStore, StoreError};

// ---------------------------------------------------------------------------
// Record builders
// ---------------------------------------------------------------------------

pub(crate) fn dept(code: &str) -> Department {
    Department::parse(code).unwrap()
}

pub(crate) fn class(id: &str, name: &str, department: Department) -> ClassRecord {
    ClassRecord {
        class_id: id.to_string(),
        name: name.to_string(),
        department,
    }
}

pub(crate) fn student(id: &str, class_id: &str) -> StudentRecord {
    StudentRecord {
        student_id: id.to_string(),
        full_name: format!("Student {id}"),
        gender: None,
        birth_date: None,
        class_id: class_id.to_string(),
        scholarship: None,
    }
}

pub(crate) fn stage1(student_id: &str, subject_id: &str, score1: Option<f64>) -> Stage1Score {
    Stage1Score {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        score1,
    }
}

pub(crate) fn stage23(
    student_id: &str,
    subject_id: &str,
    score2: Option<f64>,
    score3: Option<f64>,
) -> Stage23Score {
    Stage23Score {
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        score2,
        score3,
    }
}

/// Three classes, five students, M01 scores for four students and one M02
/// stage-1 score without later stages.
pub(crate) fn fixture() -> SeedData {
    let with_scholarship = |id: &str, class_id: &str, amount: Option<f64>| StudentRecord {
        scholarship: amount,
        ..student(id, class_id)
    };
    SeedData {
        classes: vec![
            class("L01", "Data Science 1", dept("K1")),
            class("L02", "Networks 1", dept("K2")),
            class("L03", "Data Science 2", dept("K1")),
        ],
        students: vec![
            with_scholarship("SV001", "L01", Some(1_000_000.0)),
            with_scholarship("SV002", "L01", Some(3_000_000.0)),
            with_scholarship("SV003", "L03", None),
            with_scholarship("SV004", "L02", Some(2_000_000.0)),
            with_scholarship("SV005", "L02", Some(5_000_000.0)),
        ],
        stage1: vec![
            stage1("SV001", "M01", Some(7.5)),
            stage1("SV002", "M01", Some(4.0)),
            stage1("SV004", "M01", Some(9.0)),
            stage1("SV001", "M02", Some(6.0)),
            stage1("SV005", "M01", Some(3.0)),
        ],
        stage23: vec![
            stage23("SV001", "M01", Some(8.0), Some(8.5)),
            stage23("SV002", "M01", Some(5.0), Some(6.0)),
            stage23("SV004", "M01", Some(9.0), Some(9.5)),
            stage23("SV005", "M01", Some(2.0), Some(1.0)),
        ],
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Get,
    Scan,
    Keys,
    Count,
    Insert,
    Update,
    Delete,
}

#[derive(Default)]
pub(crate) struct FaultSwitch {
    armed: [AtomicBool; 7],
    cancel_after_insert: Mutex<Option<CancellationToken>>,
    insert_delay_ms: AtomicU64,
}

impl FaultSwitch {
    fn arm(&self, fault: Fault) {
        self.armed[fault as usize].store(true, Ordering::SeqCst);
    }

    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        if self.armed[fault as usize].load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A [`MemoryPartition`] that fails on demand.
pub(crate) struct FlakyPartition<E: Entity> {
    inner: MemoryPartition<E>,
    switch: Arc<FaultSwitch>,
}

#[async_trait]
impl<E: Entity> PartitionStore<E> for FlakyPartition<E> {
    async fn get(&self, key: &E::Key, cancel: &CancellationToken) -> Result<Option<E>, StoreError> {
        self.switch.check(Fault::Get)?;
        self.inner.get(key, cancel).await
    }

    async fn scan(&self, request: &ScanRequest, cancel: &CancellationToken) -> Result<Vec<E>, StoreError> {
        self.switch.check(Fault::Scan)?;
        self.inner.scan(request, cancel).await
    }

    async fn keys(&self, cancel: &CancellationToken) -> Result<Vec<E::Key>, StoreError> {
        self.switch.check(Fault::Keys)?;
        self.inner.keys(cancel).await
    }

    async fn count(&self, filter: &Predicate, cancel: &CancellationToken) -> Result<usize, StoreError> {
        self.switch.check(Fault::Count)?;
        self.inner.count(filter, cancel).await
    }

    async fn insert(&self, record: E, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.switch.check(Fault::Insert)?;
        self.inner.insert(record, cancel).await?;
        if let Some(token) = self.switch.cancel_after_insert.lock().take() {
            token.cancel();
        }
        let delay = self.switch.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    async fn update(
        &self,
        key: &E::Key,
        mutator: Mutator<E>,
        cancel: &CancellationToken,
    ) -> Result<E, StoreError> {
        self.switch.check(Fault::Update)?;
        self.inner.update(key, mutator, cancel).await
    }

    async fn delete(&self, key: &E::Key, cancel: &CancellationToken) -> Result<E, StoreError> {
        self.switch.check(Fault::Delete)?;
        self.inner.delete(key, cancel).await
    }
}

fn flaky<E: Entity>(switch: &Arc<FaultSwitch>) -> Arc<FlakyPartition<E>> {
    Arc::new(FlakyPartition {
        inner: MemoryPartition::new(),
        switch: Arc::clone(switch),
    })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Five sites: classes split by department as usual, but one student site
/// and one stage-2/3 site each serving both `K1` and `K2`.
pub(crate) fn merged_layout() -> PartitionLayout {
    let both = || Fragment::Departments([dept("K1"), dept("K2")].into_iter().collect());
    PartitionLayout::new(vec![
        PartitionDef::new(1, "class-k1", LogicalTable::Class, Fragment::single(dept("K1"))),
        PartitionDef::new(2, "class-k2", LogicalTable::Class, Fragment::single(dept("K2"))),
        PartitionDef::new(3, "student-all", LogicalTable::Student, both()),
        PartitionDef::new(5, "score-stage1", LogicalTable::ScoreStage1, Fragment::Whole),
        PartitionDef::new(6, "score-stage23-all", LogicalTable::ScoreStage23, both()),
    ])
    .unwrap()
}

/// A gateway over fault-injectable in-memory partitions.
pub(crate) struct Harness {
    pub registry: Arc<PartitionRegistry>,
    pub ctx: Arc<GatewayContext>,
    switches: Vec<(PartitionId, Arc<FaultSwitch>)>,
}

impl Harness {
    /// The standard seven-site layout, no rows.
    pub fn empty() -> Self {
        Self::with_layout(PartitionLayout::standard())
    }

    pub fn with_layout(layout: PartitionLayout) -> Self {
        let mut stores = StoreSet::default();
        let mut switches = Vec::new();
        for def in layout.partitions() {
            let switch = Arc::new(FaultSwitch::default());
            match def.table {
                LogicalTable::Class => {
                    stores.classes.insert(def.id, flaky::<ClassRecord>(&switch));
                }
                LogicalTable::Student => {
                    stores.students.insert(def.id, flaky::<StudentRecord>(&switch));
                }
                LogicalTable::ScoreStage1 => {
                    stores.stage1.insert(def.id, flaky::<Stage1Score>(&switch));
                }
                LogicalTable::ScoreStage23 => {
                    stores.stage23.insert(def.id, flaky::<Stage23Score>(&switch));
                }
            }
            switches.push((def.id, switch));
        }

        let registry = Arc::new(PartitionRegistry::new(layout, stores).unwrap());
        let ctx = Arc::new(GatewayContext::new(
            Arc::clone(&registry),
            Arc::new(GatewayConfig::default()),
        ));
        Self {
            registry,
            ctx,
            switches,
        }
    }

    /// [`empty`](Self::empty) loaded with [`fixture`].
    pub async fn seeded() -> Self {
        Self::seeded_with(PartitionLayout::standard()).await
    }

    /// `layout` loaded with [`fixture`].
    pub async fn seeded_with(layout: PartitionLayout) -> Self {
        let harness = Self::with_layout(layout);
        load_seed(&harness.registry, &fixture(), &CancellationToken::new())
            .await
            .unwrap();
        harness
    }

    fn switch(&self, partition: PartitionId) -> &FaultSwitch {
        self.switches
            .iter()
            .find(|(id, _)| *id == partition)
            .map(|(_, s)| s.as_ref())
            .unwrap()
    }

    /// Every later `fault` call on `partition` fails with `Unavailable`.
    pub fn fail(&self, partition: PartitionId, fault: Fault) {
        self.switch(partition).arm(fault);
    }

    /// Cancels `token` right after the next successful insert on `partition`.
    pub fn cancel_after_insert(&self, partition: PartitionId, token: CancellationToken) {
        *self.switch(partition).cancel_after_insert.lock() = Some(token);
    }

    /// Inserts on `partition` land, then take `delay_ms` to report back.
    pub fn slow_inserts(&self, partition: PartitionId, delay_ms: u64) {
        self.switch(partition).insert_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn sagas(&self) -> SagaOrchestrator {
        SagaOrchestrator::new(Arc::clone(&self.registry))
    }

    pub async fn student_at(&self, partition: PartitionId, student_id: &str) -> Option<StudentRecord> {
        let site = self.registry.students().get(partition).unwrap();
        site.store()
            .get(&student_id.to_string(), &CancellationToken::new())
            .await
            .unwrap()
    }

    pub async fn stage1_at(&self, partition: PartitionId, student_id: &str, subject_id: &str) -> Option<Stage1Score> {
        let site = self.registry.stage1().get(partition).unwrap();
        site.store()
            .get(&ScoreKey::new(student_id, subject_id), &CancellationToken::new())
            .await
            .unwrap()
    }

    pub async fn stage23_at(&self, partition: PartitionId, student_id: &str, subject_id: &str) -> Option<Stage23Score> {
        let site = self.registry.stage23().get(partition).unwrap();
        site.store()
            .get(&ScoreKey::new(student_id, subject_id), &CancellationToken::new())
            .await
            .unwrap()
    }
}

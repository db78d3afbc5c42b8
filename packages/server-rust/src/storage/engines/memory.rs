//! In-memory [`PartitionStore`] backed by [`DashMap`].
//!
//! Stands in for the external fragment store. Enforces primary-key
//! uniqueness on insert, so two writers that were handed the same generated
//! id cannot silently overwrite each other: the second insert fails.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fragdb_core::filter::compare_records;
use fragdb_core::{Entity, Predicate, ScanRequest};
use tokio_util::sync::CancellationToken;

use crate::storage::engine::{Mutator, PartitionStore, StoreError};

/// One partition's rows, keyed by primary key.
pub struct MemoryPartition<E: Entity> {
    entries: DashMap<E::Key, E>,
}

impl<E: Entity> MemoryPartition<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self, filter: &Predicate) -> Vec<E> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl<E: Entity> Default for MemoryPartition<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> FromIterator<E> for MemoryPartition<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> PartitionStore<E> for MemoryPartition<E> {
    async fn get(&self, key: &E::Key, cancel: &CancellationToken) -> Result<Option<E>, StoreError> {
        ensure_live(cancel)?;
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    async fn scan(&self, request: &ScanRequest, cancel: &CancellationToken) -> Result<Vec<E>, StoreError> {
        ensure_live(cancel)?;
        let mut rows = self.snapshot(&request.filter);
        rows.sort_by(|a, b| compare_records(a, b, request.sort.as_ref()));
        Ok(request.page.apply(rows))
    }

    async fn keys(&self, cancel: &CancellationToken) -> Result<Vec<E::Key>, StoreError> {
        ensure_live(cancel)?;
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn count(&self, filter: &Predicate, cancel: &CancellationToken) -> Result<usize, StoreError> {
        ensure_live(cancel)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count())
    }

    async fn insert(&self, record: E, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        match self.entries.entry(record.key()) {
            Entry::Occupied(occupied) => Err(StoreError::DuplicateKey {
                key: occupied.key().to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        key: &E::Key,
        mutator: Mutator<E>,
        cancel: &CancellationToken,
    ) -> Result<E, StoreError> {
        ensure_live(cancel)?;
        let mut row = self.entries.get_mut(key).ok_or_else(|| StoreError::MissingKey {
            key: key.to_string(),
        })?;
        let previous = row.value().clone();
        mutator(row.value_mut());
        debug_assert!(row.value().key() == *key, "update changed the primary key");
        Ok(previous)
    }

    async fn delete(&self, key: &E::Key, cancel: &CancellationToken) -> Result<E, StoreError> {
        ensure_live(cancel)?;
        self.entries
            .remove(key)
            .map(|(_, r)| r)
            .ok_or_else(|| StoreError::MissingKey {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use fragdb_core::{Page, SortSpec, StudentRecord};

    use super::*;

    fn student(id: &str, class_id: &str, scholarship: Option<f64>) -> StudentRecord {
        StudentRecord {
            student_id: id.to_string(),
            full_name: format!("Nguyen {id}"),
            gender: Some("Nam".to_string()),
            birth_date: None,
            class_id: class_id.to_string(),
            scholarship,
        }
    }

    #[tokio::test]
    async fn insert_get_delete_round_trip() {
        let store = MemoryPartition::new();
        let cancel = CancellationToken::new();

        store.insert(student("SV001", "L01", None), &cancel).await.unwrap();
        let fetched = store.get(&"SV001".to_string(), &cancel).await.unwrap();
        assert_eq!(fetched.unwrap().class_id, "L01");

        let removed = store.delete(&"SV001".to_string(), &cancel).await.unwrap();
        assert_eq!(removed.student_id, "SV001");
        assert!(store.get(&"SV001".to_string(), &cancel).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryPartition::new();
        let cancel = CancellationToken::new();
        store.insert(student("SV001", "L01", None), &cancel).await.unwrap();

        let err = store
            .insert(student("SV001", "L02", None), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey { key: "SV001".into() });

        let kept = store.get(&"SV001".to_string(), &cancel).await.unwrap().unwrap();
        assert_eq!(kept.class_id, "L01");
    }

    #[tokio::test]
    async fn update_and_delete_require_presence() {
        let store: MemoryPartition<StudentRecord> = MemoryPartition::new();
        let cancel = CancellationToken::new();
        let missing = "SV404".to_string();

        let err = store
            .update(&missing, Box::new(|s| s.full_name.clear()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
        assert!(store.delete(&missing, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn update_returns_previous_row() {
        let store: MemoryPartition<_> = [student("SV001", "L01", Some(1.0))].into_iter().collect();
        let cancel = CancellationToken::new();

        let previous = store
            .update(
                &"SV001".to_string(),
                Box::new(|s| s.scholarship = Some(2.0)),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(previous.scholarship, Some(1.0));

        let current = store.get(&"SV001".to_string(), &cancel).await.unwrap().unwrap();
        assert_eq!(current.scholarship, Some(2.0));
    }

    #[tokio::test]
    async fn scan_filters_sorts_and_pages() {
        let store: MemoryPartition<_> = [
            student("SV003", "L01", Some(3.0)),
            student("SV001", "L01", Some(1.0)),
            student("SV002", "L02", Some(2.0)),
            student("SV004", "L01", Some(4.0)),
        ]
        .into_iter()
        .collect();
        let cancel = CancellationToken::new();

        let by_key = store
            .scan(&ScanRequest::filtered(Predicate::eq("class_id", "L01")), &cancel)
            .await
            .unwrap();
        let ids: Vec<_> = by_key.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, ["SV001", "SV003", "SV004"]);

        let top = store
            .scan(
                &ScanRequest::default()
                    .with_sort(SortSpec::desc("scholarship"))
                    .with_page(Page::new(1, 2)),
                &cancel,
            )
            .await
            .unwrap();
        let ids: Vec<_> = top.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, ["SV003", "SV002"]);

        assert_eq!(store.count(&Predicate::True, &cancel).await.unwrap(), 4);
        assert_eq!(store.keys(&cancel).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cancelled_calls_do_nothing() {
        let store = MemoryPartition::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .insert(student("SV001", "L01", None), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Cancelled);
        assert!(store.is_empty());
    }
}

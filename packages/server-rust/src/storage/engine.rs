//! Partition access trait: the uniform interface to one fragment store.
//!
//! Every logical table is reached through [`PartitionStore`], whatever engine
//! actually holds the fragment. Each call accepts a [`CancellationToken`] and
//! may fail with a [`StoreError`]. A store guarantees atomicity of a single
//! insert, update or delete and nothing across calls.

use async_trait::async_trait;
use fragdb_core::{Entity, GatewayError, PartitionDef, Predicate, ScanRequest};
use tokio_util::sync::CancellationToken;

/// In-place edit applied by [`PartitionStore::update`].
pub type Mutator<E> = Box<dyn FnOnce(&mut E) + Send>;

/// Errors from a single partition call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key {key}")]
    DuplicateKey { key: String },

    #[error("missing key {key}")]
    MissingKey { key: String },

    #[error("{0}")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,
}

impl StoreError {
    /// Attaches the partition the call was made against.
    #[must_use]
    pub fn at(self, partition: &PartitionDef) -> GatewayError {
        match self {
            Self::DuplicateKey { key } => {
                GatewayError::conflict(format!("key {key} on partition {partition}"))
            }
            Self::MissingKey { key } => {
                GatewayError::not_found(format!("key {key} on partition {partition}"))
            }
            Self::Unavailable(reason) => GatewayError::unavailable(partition.to_string(), reason),
            Self::Cancelled => GatewayError::Cancelled,
        }
    }
}

/// CRUD and filtered scans against one partition of one logical table.
///
/// Wrapped in `Arc<dyn PartitionStore<E>>` and shared by the registry.
#[async_trait]
pub trait PartitionStore<E: Entity>: Send + Sync {
    async fn get(&self, key: &E::Key, cancel: &CancellationToken) -> Result<Option<E>, StoreError>;

    /// Rows matching `request.filter`, ordered by `request.sort` (primary key
    /// when absent, and as tie-break), windowed by `request.page`.
    async fn scan(&self, request: &ScanRequest, cancel: &CancellationToken) -> Result<Vec<E>, StoreError>;

    /// Every primary key held by the partition.
    async fn keys(&self, cancel: &CancellationToken) -> Result<Vec<E::Key>, StoreError>;

    async fn count(&self, filter: &Predicate, cancel: &CancellationToken) -> Result<usize, StoreError>;

    /// Fails with [`StoreError::DuplicateKey`] if the key is already present.
    async fn insert(&self, record: E, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Applies `mutator` to the stored row and returns the row as it was before.
    ///
    /// Fails with [`StoreError::MissingKey`] if the key is absent. The mutator
    /// must not change the primary key.
    async fn update(
        &self,
        key: &E::Key,
        mutator: Mutator<E>,
        cancel: &CancellationToken,
    ) -> Result<E, StoreError>;

    /// Removes and returns the row. Fails with [`StoreError::MissingKey`] if absent.
    async fn delete(&self, key: &E::Key, cancel: &CancellationToken) -> Result<E, StoreError>;
}

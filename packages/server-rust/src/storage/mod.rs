//! Partition access for the gateway.
//!
//! - [`PartitionStore`]: Uniform CRUD + filtered scan interface to one fragment
//! - [`StoreError`]: Failures of a single partition call
//! - [`MemoryPartition`]: `DashMap`-backed store used when no external engine
//!   is attached

pub mod engine;
pub mod engines;

pub use engine::*;
pub use engines::MemoryPartition;

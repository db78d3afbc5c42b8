//! `fragdb` gateway: one logical API over a set of department-fragmented
//! partitions.
//!
//! Single-partition operations are routed by fragmentation key
//! ([`registry`]), multi-partition writes run as compensating sagas
//! ([`saga`]), and cross-partition reads are scattered and joined at the
//! gateway ([`query`]). Domain services and the tower pipeline in front of
//! them live in [`service`].

pub mod query;
pub mod registry;
pub mod saga;
pub mod seed;
pub mod sequence;
pub mod service;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{PartitionRegistry, StoreSet};
pub use saga::{SagaOrchestrator, SagaPlan, SagaReport};
pub use seed::{load_seed, SeedData};
pub use service::{build_operation_pipeline, GatewayConfig, GatewayContext, Operation, OperationRouter};

//! `fragdb` core: fragmentation layout, entities, predicates, score math and
//! saga records shared by the gateway.

pub mod entity;
pub mod error;
pub mod filter;
pub mod partition;
pub mod saga;
pub mod score;
pub mod sequence;

pub use entity::{
    ClassRecord, Department, Entity, LogicalTable, Placement, Row, RowKey, ScoreKey, Stage1Score,
    Stage23Score, StudentRecord, DEPARTMENT_FIELD,
};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use filter::{FieldValue, Page, Predicate, ScanRequest, SortDirection, SortSpec};
pub use partition::{Fragment, PartitionDef, PartitionId, PartitionLayout};
pub use saga::{MutationKind, OperationResult, SagaStatus, SagaTransaction, SiteOperation};
pub use sequence::IdFormat;

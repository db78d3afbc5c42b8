//! Operation routing and execution framework.
//!
//! This module implements the service-oriented operation pipeline:
//!
//! 1. **Operations** (`operation`): one typed request per domain service
//! 2. **Middleware** (`middleware`): Tower layers (load-shedding, timeout, metrics)
//! 3. **Routing** (`router`): Dispatch to domain services by `service_name`
//! 4. **Domain services** (`domain`): student, class, registration, report and admin

pub mod config;
pub mod context;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod router;

// Re-export key types for convenient access.
pub use config::{GatewayConfig, PartitionConfig};
pub use context::GatewayContext;
pub use middleware::build_operation_pipeline;
pub use operation::{
    service_names, Operation, OperationContext, OperationError, OperationResponse,
};
pub use router::OperationRouter;

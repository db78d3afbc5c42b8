//! Layers wrapped around [`OperationRouter`](crate::service::OperationRouter).
//!
//! From the outside in: [`load_shed`] admits data operations against a
//! shared permit pool, [`timeout`] cancels late operations and waits for
//! their compensation, [`metrics`] records duration and outcome on a span.
//! [`pipeline`] stacks them.

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_operation_pipeline;
pub use timeout::TimeoutLayer;

use std::sync::Arc;

use fragdb_core::{ClassRecord, Department, GatewayError, GatewayResult, StudentRecord};
use tokio_util::sync::CancellationToken;

use super::config::GatewayConfig;
use crate::query::ScatterGather;
use crate::registry::{Located, PartitionRegistry};
use crate::saga::SagaOrchestrator;

/// Shared state handed to every domain service.
///
/// Built once at startup. Holds no mutable state of its own; partitions are
/// the only shared mutable resource.
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: Arc<PartitionRegistry>,
    pub sagas: SagaOrchestrator,
    pub engine: ScatterGather,
    pub config: Arc<GatewayConfig>,
}

impl GatewayContext {
    #[must_use]
    pub fn new(registry: Arc<PartitionRegistry>, config: Arc<GatewayConfig>) -> Self {
        Self {
            sagas: SagaOrchestrator::new(Arc::clone(&registry)),
            engine: ScatterGather::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }

    /// Finds a class on whichever class partition holds it.
    ///
    /// # Errors
    ///
    /// `NotFound` if no partition holds it; `PartitionUnavailable` if any
    /// lookup fails.
    pub async fn locate_class(
        &self,
        class_id: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<Located<'_, ClassRecord>> {
        self.registry
            .classes()
            .lookup_key_owner(&class_id.to_string(), cancel)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("class {class_id}")))
    }

    /// Finds a student on whichever student partition holds them.
    ///
    /// # Errors
    ///
    /// `NotFound` if no partition holds the id; `PartitionUnavailable` if
    /// any lookup fails.
    pub async fn locate_student(
        &self,
        student_id: &str,
        cancel: &CancellationToken,
    ) -> GatewayResult<Located<'_, StudentRecord>> {
        self.registry
            .students()
            .lookup_key_owner(&student_id.to_string(), cancel)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("student {student_id}")))
    }

    /// Parses a caller-supplied department and checks the layout serves it.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for malformed or unknown departments.
    pub fn department(&self, raw: &str) -> GatewayResult<Department> {
        self.registry.layout().department(raw)
    }

    /// Optional variant of [`department`](Self::department); blank counts as absent.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for malformed or unknown departments.
    pub fn department_opt(&self, raw: Option<&str>) -> GatewayResult<Option<Department>> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| self.department(s))
            .transpose()
    }
}

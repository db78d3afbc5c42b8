//! Admin service: system overview and partition topology.

use std::sync::Arc;

use fragdb_core::{GatewayResult, Predicate, Stage1Score};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::class::{department_summaries, DepartmentSummary};
use super::domain_service;
use crate::service::config::PartitionConfig;
use crate::service::context::GatewayContext;
use crate::service::operation::{OperationError, OperationResponse};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub node_id: String,
    pub departments: Vec<DepartmentSummary>,
    pub total_classes: usize,
    pub total_students: usize,
    pub total_registrations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRequest {
    Overview,
    Topology,
}

pub struct AdminService {
    ctx: Arc<GatewayContext>,
}

impl AdminService {
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Fails if any partition count fails.
    pub async fn overview(&self, cancel: &CancellationToken) -> GatewayResult<Overview> {
        let (departments, total_registrations) = futures_util::try_join!(
            department_summaries(&self.ctx, cancel),
            self.ctx.engine.count::<Stage1Score>(&Predicate::True, cancel),
        )?;
        Ok(Overview {
            node_id: self.ctx.config.node_id.clone(),
            total_classes: departments.iter().map(|d| d.classes).sum(),
            total_students: departments.iter().map(|d| d.students).sum(),
            departments,
            total_registrations,
        })
    }

    #[must_use]
    pub fn topology(&self) -> Vec<PartitionConfig> {
        self.ctx
            .registry
            .layout()
            .partitions()
            .iter()
            .map(PartitionConfig::from)
            .collect()
    }

    async fn handle(
        &self,
        request: AdminRequest,
        cancel: &CancellationToken,
    ) -> Result<OperationResponse, OperationError> {
        match request {
            AdminRequest::Overview => OperationResponse::data(&self.overview(cancel).await?),
            AdminRequest::Topology => OperationResponse::data(&self.topology()),
        }
    }
}

domain_service!(AdminService, Admin);

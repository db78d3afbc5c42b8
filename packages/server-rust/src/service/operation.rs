//! Operation types carried through the pipeline.

use fragdb_core::{GatewayError, OperationResult};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::domain::{AdminRequest, ClassRequest, RegistrationRequest, ReportRequest, StudentRequest};

/// Service names used to route operations.
pub mod service_names {
    pub const STUDENT: &str = "student";
    pub const CLASS: &str = "class";
    pub const REGISTRATION: &str = "registration";
    pub const REPORT: &str = "report";
    pub const ADMIN: &str = "admin";
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub service_name: &'static str,
    pub call_timeout_ms: u64,
    /// Cancelled by the timeout layer; every partition call observes it.
    pub cancel: CancellationToken,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, service_name: &'static str, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            service_name,
            call_timeout_ms,
            cancel: CancellationToken::new(),
        }
    }
}

/// Typed operation variants dispatched through the pipeline, one per
/// domain service.
#[derive(Debug)]
pub enum Operation {
    Student { ctx: OperationContext, request: StudentRequest },
    Class { ctx: OperationContext, request: ClassRequest },
    Registration { ctx: OperationContext, request: RegistrationRequest },
    Report { ctx: OperationContext, request: ReportRequest },
    Admin { ctx: OperationContext, request: AdminRequest },
}

impl Operation {
    #[must_use]
    pub fn student(call_id: u64, timeout_ms: u64, request: StudentRequest) -> Self {
        Self::Student {
            ctx: OperationContext::new(call_id, service_names::STUDENT, timeout_ms),
            request,
        }
    }

    #[must_use]
    pub fn class(call_id: u64, timeout_ms: u64, request: ClassRequest) -> Self {
        Self::Class {
            ctx: OperationContext::new(call_id, service_names::CLASS, timeout_ms),
            request,
        }
    }

    #[must_use]
    pub fn registration(call_id: u64, timeout_ms: u64, request: RegistrationRequest) -> Self {
        Self::Registration {
            ctx: OperationContext::new(call_id, service_names::REGISTRATION, timeout_ms),
            request,
        }
    }

    #[must_use]
    pub fn report(call_id: u64, timeout_ms: u64, request: ReportRequest) -> Self {
        Self::Report {
            ctx: OperationContext::new(call_id, service_names::REPORT, timeout_ms),
            request,
        }
    }

    #[must_use]
    pub fn admin(call_id: u64, timeout_ms: u64, request: AdminRequest) -> Self {
        Self::Admin {
            ctx: OperationContext::new(call_id, service_names::ADMIN, timeout_ms),
            request,
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::Student { ctx, .. }
            | Self::Class { ctx, .. }
            | Self::Registration { ctx, .. }
            | Self::Report { ctx, .. }
            | Self::Admin { ctx, .. } => ctx,
        }
    }

    pub fn ctx_mut(&mut self) -> &mut OperationContext {
        match self {
            Self::Student { ctx, .. }
            | Self::Class { ctx, .. }
            | Self::Registration { ctx, .. }
            | Self::Report { ctx, .. }
            | Self::Admin { ctx, .. } => ctx,
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationResponse {
    /// Read result.
    Data(Value),
    /// Write result, successful or not, with its saga trace.
    Outcome(OperationResult<Value>),
}

impl OperationResponse {
    /// # Errors
    ///
    /// Fails if `data` does not serialize to JSON.
    pub fn data<T: Serialize>(data: &T) -> Result<Self, OperationError> {
        Ok(Self::Data(serde_json::to_value(data)?))
    }

    /// # Errors
    ///
    /// Fails if the payload does not serialize to JSON.
    pub fn outcome<T: Serialize>(result: OperationResult<T>) -> Result<Self, OperationError> {
        let OperationResult {
            success,
            message,
            data,
            warnings,
            error,
            transaction,
        } = result;
        Ok(Self::Outcome(OperationResult {
            success,
            message,
            data: data.map(|d| serde_json::to_value(&d)).transpose()?,
            warnings,
            error,
            transaction,
        }))
    }
}

/// Errors returned by operation handlers.
///
/// Domain failures of writes are not errors here: they travel inside
/// [`OperationResponse::Outcome`] with their saga trace.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    /// `outcome` is the write result the handler reported after being
    /// cancelled, warnings and saga trace included.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        timeout_ms: u64,
        outcome: Option<Box<OperationResult<Value>>>,
    },
    #[error("gateway at capacity ({limit} operations in flight), try again later")]
    Overloaded { limit: u32 },
    #[error("wrong service for operation")]
    WrongService,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("encoding response: {0}")]
    Encode(#[from] serde_json::Error),
}

//! Domain services.
//!
//! Each service is a thin composition of router lookups, saga plans and
//! scatter-gather reads over a shared [`GatewayContext`], and implements
//! `tower::Service<Operation>` for its own [`Operation`] variant.

/// Implements `tower::Service<Operation>` for `Arc<$name>`, routing the
/// matching [`Operation`](crate::service::operation::Operation) variant to
/// `$name::handle`.
macro_rules! domain_service {
    ($name:ident, $variant:ident) => {
        impl tower::Service<crate::service::operation::Operation> for std::sync::Arc<$name> {
            type Response = crate::service::operation::OperationResponse;
            type Error = crate::service::operation::OperationError;
            type Future = std::pin::Pin<
                Box<
                    dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send,
                >,
            >;

            fn poll_ready(
                &mut self,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<Result<(), Self::Error>> {
                std::task::Poll::Ready(Ok(()))
            }

            fn call(&mut self, op: crate::service::operation::Operation) -> Self::Future {
                let svc = std::sync::Arc::clone(self);
                Box::pin(async move {
                    match op {
                        crate::service::operation::Operation::$variant { ctx, request } => {
                            svc.handle(request, &ctx.cancel).await
                        }
                        _ => Err(crate::service::operation::OperationError::WrongService),
                    }
                })
            }
        }
    };
}

pub(crate) use domain_service;

pub mod admin;
pub mod class;
pub mod registration;
pub mod report;
pub mod student;

use fragdb_core::Page;

pub use admin::{AdminRequest, AdminService};
pub use class::{ClassRequest, ClassService};
pub use registration::{RegistrationRequest, RegistrationService};
pub use report::{ReportRequest, ReportService};
pub use student::{StudentRequest, StudentService};

use crate::service::context::GatewayContext;

/// The caller's page, or the first page of the configured default size.
fn page_or_default(ctx: &GatewayContext, page: Option<Page>) -> Page {
    page.unwrap_or_else(|| Page::first(ctx.config.default_page_size))
}

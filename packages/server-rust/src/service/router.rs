//! Operation routing: dispatches `Operation` to domain services by `service_name`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use std::sync::Arc;

use tower::Service;

use super::context::GatewayContext;
use super::domain::{AdminService, ClassService, RegistrationService, ReportService, StudentService};
use super::operation::{service_names, Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// DomainHandler trait alias
// ---------------------------------------------------------------------------

/// A boxed Tower service that handles operations for a single domain.
type BoxedService =
    Box<dyn Service<Operation, Response = OperationResponse, Error = OperationError, Future = BoxedFuture> + Send>;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Routes `Operation` values to the correct domain service by `service_name`.
///
/// Each registered domain service is a `tower::Service<Operation>` keyed by
/// its service name (e.g., `"student"`, `"report"`). Operations with an unregistered
/// `service_name` return `OperationError::UnknownService`.
pub struct OperationRouter {
    services: HashMap<&'static str, BoxedService>,
}

impl OperationRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a domain service for the given name.
    pub fn register<S>(&mut self, name: &'static str, service: S)
    where
        S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.services.insert(name, Box::new(ServiceWrapper(service)));
    }

    /// A router with every domain service registered over `ctx`.
    #[must_use]
    pub fn for_gateway(ctx: &Arc<GatewayContext>) -> Self {
        let mut router = Self::new();
        router.register(service_names::STUDENT, Arc::new(StudentService::new(Arc::clone(ctx))));
        router.register(service_names::CLASS, Arc::new(ClassService::new(Arc::clone(ctx))));
        router.register(
            service_names::REGISTRATION,
            Arc::new(RegistrationService::new(Arc::clone(ctx))),
        );
        router.register(service_names::REPORT, Arc::new(ReportService::new(Arc::clone(ctx))));
        router.register(service_names::ADMIN, Arc::new(AdminService::new(Arc::clone(ctx))));
        router
    }
}

impl Default for OperationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Operation> for OperationRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // All registered services must be ready. If any is not ready, return pending.
        for svc in self.services.values_mut() {
            match svc.poll_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service_name = op.ctx().service_name;
        match self.services.get_mut(service_name) {
            Some(svc) => svc.call(op),
            None => Box::pin(async move {
                Err(OperationError::UnknownService {
                    name: service_name.to_string(),
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceWrapper (type-erased adapter)
// ---------------------------------------------------------------------------

/// Wrapper to type-erase a concrete `Service<Operation>` into a `BoxedService`.
struct ServiceWrapper<S>(S);

impl<S> Service<Operation> for ServiceWrapper<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(self.0.call(op))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::service::domain::{AdminRequest, ReportRequest};
    use crate::service::operation::OperationContext;
    use crate::testing::Harness;

    /// A stub service that answers with its own name.
    #[derive(Clone)]
    struct StubService {
        name: &'static str,
    }

    impl Service<Operation> for StubService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let name = self.name;
            let call_id = op.ctx().call_id;
            Box::pin(async move { Ok(OperationResponse::Data(json!({ "service": name, "call_id": call_id }))) })
        }
    }

    fn op_for(service_name: &'static str) -> Operation {
        Operation::Admin {
            ctx: OperationContext::new(1, service_name, 5000),
            request: AdminRequest::Topology,
        }
    }

    #[tokio::test]
    async fn routes_to_registered_service() {
        let mut router = OperationRouter::new();
        router.register(service_names::ADMIN, StubService { name: "admin" });

        let resp = router.oneshot(op_for(service_names::ADMIN)).await.unwrap();
        assert_eq!(resp, OperationResponse::Data(json!({ "service": "admin", "call_id": 1 })));
    }

    #[tokio::test]
    async fn unknown_service_returns_error() {
        let mut router = OperationRouter::new();
        router.register(service_names::ADMIN, StubService { name: "admin" });

        let err = router.oneshot(op_for("nonexistent")).await.unwrap_err();
        assert!(matches!(
            err,
            OperationError::UnknownService { name } if name == "nonexistent"
        ));
    }

    #[tokio::test]
    async fn routes_to_correct_service_among_multiple() {
        let mut router = OperationRouter::new();
        router.register(service_names::STUDENT, StubService { name: "student" });
        router.register(service_names::CLASS, StubService { name: "class" });
        router.register(service_names::REPORT, StubService { name: "report" });

        for name in [service_names::CLASS, service_names::REPORT] {
            let resp = ServiceExt::ready(&mut router)
                .await
                .unwrap()
                .call(op_for(name))
                .await
                .unwrap();
            let OperationResponse::Data(body) = resp else {
                panic!("expected data");
            };
            assert_eq!(body["service"], name);
        }
    }

    #[tokio::test]
    async fn gateway_router_serves_domain_operations() {
        let harness = Harness::seeded().await;
        let mut router = OperationRouter::for_gateway(&harness.ctx);

        let topology = ServiceExt::ready(&mut router)
            .await
            .unwrap()
            .call(Operation::admin(1, 5000, AdminRequest::Topology))
            .await
            .unwrap();
        let OperationResponse::Data(Value::Array(partitions)) = topology else {
            panic!("expected partition list");
        };
        assert_eq!(partitions.len(), 7);

        let report = Operation::report(
            2,
            5000,
            ReportRequest::Scholarships {
                department: Some("K2".into()),
                min_amount: 0.0,
                top: Some(1),
            },
        );
        let resp = ServiceExt::ready(&mut router).await.unwrap().call(report).await.unwrap();
        let OperationResponse::Data(body) = resp else {
            panic!("expected data");
        };
        assert_eq!(body[0]["student_id"], "SV005");
    }
}

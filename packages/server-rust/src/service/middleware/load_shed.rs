//! Admission control for gateway operations.
//!
//! Every data operation holds one permit from a shared pool until its
//! handler returns, saga compensation included. With the pool empty the
//! operation is refused with `OperationError::Overloaded` before any
//! partition is contacted. Admin operations skip the pool so topology and
//! health stay readable while the gateway is saturated.

use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::service::operation::{service_names, Operation, OperationError, OperationResponse};

type BoxedResponse = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

/// Shares one permit pool between every service it wraps.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    permits: Arc<Semaphore>,
    limit: u32,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit as usize)),
            limit,
        }
    }

    /// Data operations currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        (self.limit as usize).saturating_sub(self.permits.available_permits())
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            permits: Arc::clone(&self.permits),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    permits: Arc<Semaphore>,
    limit: u32,
}

impl<S> Service<Operation> for LoadShedService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxedResponse;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service = op.ctx().service_name;
        if service == service_names::ADMIN {
            return Box::pin(self.inner.call(op));
        }

        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                let fut = self.inner.call(op);
                Box::pin(async move {
                    let _permit = permit;
                    fut.await
                })
            }
            Err(_) => {
                tracing::warn!(
                    call_id = op.ctx().call_id,
                    service,
                    limit = self.limit,
                    "gateway at capacity, operation shed"
                );
                Box::pin(ready(Err(OperationError::Overloaded { limit: self.limit })))
            }
        }
    }
}

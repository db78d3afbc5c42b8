//! Timeout middleware for operations.
//!
//! On expiry the operation's cancellation token is cancelled and the inner
//! future is still driven to completion, so a saga that already wrote to a
//! partition finishes compensating before `OperationError::Timeout` is
//! returned. A write outcome reported during the drain rides on the error.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-operation timeout enforcement.
///
/// The timeout is read from each operation's `ctx.call_timeout_ms` field,
/// allowing different operations to have different timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-operation timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let timeout_ms = op.ctx().call_timeout_ms;
        let cancel = op.ctx().cancel.clone();
        let call_id = op.ctx().call_id;
        let fut = self.inner.call(op);
        Box::pin(async move {
            tokio::pin!(fut);
            let duration = Duration::from_millis(timeout_ms);
            match tokio::time::timeout(duration, &mut fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    tracing::warn!(call_id, timeout_ms, "operation timed out, cancelling");
                    cancel.cancel();
                    let outcome = match fut.await {
                        Ok(OperationResponse::Outcome(result)) => Some(Box::new(result)),
                        _ => None,
                    };
                    Err(OperationError::Timeout { timeout_ms, outcome })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

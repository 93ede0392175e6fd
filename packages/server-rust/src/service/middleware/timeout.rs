//! Timeout middleware for operation calls.
//!
//! Rejects calls that exceed their `timeout_ms` with a `timeout` envelope.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::{DispatchError, OperationCall, OperationError, Response};

/// Enforces each call's own `timeout_ms`; zero means no deadline.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<OperationCall> for TimeoutService<S>
where
    S: Service<OperationCall, Response = Response, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: OperationCall) -> Self::Future {
        let timeout_ms = call.timeout_ms;
        if timeout_ms == 0 {
            return Box::pin(self.inner.call(call));
        }
        let operation = call.operation.clone();
        let call_id = call.call_id;
        let trace_id = call.ctx.trace_id.clone();
        let fut = self.inner.call(call);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                // Dropping the inner future abandons the handler mid-flight.
                Err(_elapsed) => {
                    debug!(
                        operation = %operation,
                        call_id,
                        trace_id = %trace_id,
                        timeout_ms,
                        "operation timed out"
                    );
                    Err(DispatchError::from_operation(
                        &operation,
                        OperationError::Timeout { timeout_ms },
                    ))
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

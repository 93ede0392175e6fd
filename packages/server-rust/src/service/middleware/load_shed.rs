//! Load shedding: at most `max_concurrent_operations` calls are in flight;
//! any call beyond that fails fast with an `overloaded` envelope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{DispatchError, OperationCall, OperationError, Response};

#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        let limit = max_concurrent as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
            limit: self.limit,
        }
    }
}

/// Holds one semaphore permit per in-flight call.
#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl<S> LoadShedService<S> {
    /// Calls currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }
}

impl<S> Service<OperationCall> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            warn!(
                operation = %call.operation,
                call_id = call.call_id,
                trace_id = %call.ctx.trace_id,
                session_id = ?call.ctx.session_id,
                limit = self.limit,
                "operation shed"
            );
            ::metrics::counter!("dsgate_operations_shed_total", "operation" => call.operation.clone())
                .increment(1);
            let err = DispatchError::from_operation(&call.operation, OperationError::Overloaded);
            return Box::pin(async move { Err(err) });
        };

        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

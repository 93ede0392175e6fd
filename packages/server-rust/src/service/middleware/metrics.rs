//! Metrics middleware for operation calls.
//!
//! Wraps each call in an `operation` tracing span and records
//! `dsgate_operations_total{operation,outcome}` and
//! `dsgate_operation_duration_seconds{operation}` through the `metrics`
//! facade. Without an installed recorder the metric calls are no-ops.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{DispatchError, OperationCall, Response};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<OperationCall> for MetricsService<S>
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
        let operation = call.operation.clone();
        let call_id = call.call_id;

        let span = info_span!(
            "operation",
            operation = %operation,
            call_id = call_id,
            trace_id = %call.ctx.trace_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.code.as_str(),
                };

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                ::metrics::counter!(
                    "dsgate_operations_total",
                    "operation" => operation.clone(),
                    "outcome" => outcome,
                )
                .increment(1);
                ::metrics::histogram!(
                    "dsgate_operation_duration_seconds",
                    "operation" => operation.clone(),
                )
                .record(elapsed.as_secs_f64());

                tracing::info!(
                    operation = %operation,
                    call_id = call_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "operation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

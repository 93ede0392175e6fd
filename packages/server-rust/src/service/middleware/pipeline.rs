//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServerConfig;
use crate::service::dispatcher::Dispatcher;
use crate::service::operation::{DispatchError, OperationCall, Response};

/// Type-erased dispatch pipeline, shareable across threads without a lock.
pub type DispatchPipeline = BoxCloneSyncService<OperationCall, Response, DispatchError>;

/// Build the dispatch pipeline by wrapping the `Dispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-call timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Dispatcher, config: &ServerConfig) -> DispatchPipeline {
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(config.max_concurrent_operations))
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .service(dispatcher),
    )
}

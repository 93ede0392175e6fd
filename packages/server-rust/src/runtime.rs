//! Runtime assembly: wires stores, backend, registry, and the dispatch
//! pipeline together, and owns the background session sweeper.

use std::sync::Arc;

use dsgate_core::{NavigatorSettings, RequestContext, ValueMap};
use tower::ServiceExt;
use tracing::info;

use crate::backend::InMemoryBackend;
use crate::service::call::CallBuilder;
use crate::service::catalog::CORE_OPERATIONS;
use crate::service::config::ServerConfig;
use crate::service::dispatcher::Dispatcher;
use crate::service::middleware::{build_dispatch_pipeline, DispatchPipeline};
use crate::service::operation::{DispatchError, OperationCall, OperationClass, Response};
use crate::service::registry::{HandlerEnv, OperationDescriptor, OperationRegistry, RegistryError};
use crate::service::worker::{BackgroundWorker, SessionSweeper};
use crate::session::{InMemorySessionStore, SessionDefaults, SessionResolver};
use crate::task::TaskTracker;
use crate::traits::{CoreBackend, SessionStore};

/// Failure while assembling a [`Runtime`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A fully assembled dispatch runtime.
pub struct Runtime {
    config: ServerConfig,
    dispatcher: Dispatcher,
    pipeline: DispatchPipeline,
    calls: CallBuilder,
    sweeper: Option<BackgroundWorker<SessionSweeper>>,
}

impl Runtime {
    /// Assembles a runtime serving the core catalog.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` for an invalid configuration.
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn CoreBackend>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, RuntimeError> {
        Self::with_operations(config, backend, store, &[])
    }

    /// Assembles a runtime serving the core catalog plus `extra` descriptors.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` for an invalid configuration and
    /// `RuntimeError::Registry` when `extra` collides with the catalog.
    pub fn with_operations(
        config: ServerConfig,
        backend: Arc<dyn CoreBackend>,
        store: Arc<dyn SessionStore>,
        extra: &'static [OperationDescriptor],
    ) -> Result<Self, RuntimeError> {
        config
            .validate()
            .map_err(|err| RuntimeError::Config(format!("{err:#}")))?;

        let registry = OperationRegistry::build([CORE_OPERATIONS, extra])?;
        let tasks = Arc::new(TaskTracker::new());
        let env = HandlerEnv {
            backend,
            sessions: SessionResolver::new(store, Arc::clone(&tasks)),
            tasks,
        };
        let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(env));
        let pipeline = build_dispatch_pipeline(dispatcher.clone(), &config);
        let calls = CallBuilder::new(config.default_operation_timeout_ms);

        info!(
            operations = dispatcher.registry().len(),
            max_concurrent = config.max_concurrent_operations,
            "runtime assembled"
        );

        Ok(Self {
            config,
            dispatcher,
            pipeline,
            calls,
            sweeper: None,
        })
    }

    /// Runtime backed by the in-memory session store and backend.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` for an invalid configuration.
    pub fn in_memory(config: ServerConfig) -> Result<Self, RuntimeError> {
        let backend = Arc::new(InMemoryBackend::new(&config));
        Self::in_memory_with_backend(config, backend)
    }

    /// Runtime backed by the in-memory session store and the given backend.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` for an invalid configuration.
    pub fn in_memory_with_backend(
        config: ServerConfig,
        backend: Arc<dyn CoreBackend>,
    ) -> Result<Self, RuntimeError> {
        let store = Arc::new(InMemorySessionStore::new(
            config.session_ttl_ms,
            session_defaults(&config),
            config.supported_locales.clone(),
        ));
        Self::new(config, backend, store)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskTracker> {
        &self.dispatcher.env().tasks
    }

    /// Launches the background session sweeper. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let sweeper = SessionSweeper::new(self.dispatcher.env().sessions.clone());
        self.sweeper = Some(BackgroundWorker::start(
            sweeper,
            self.config.sweep_interval_ms,
        ));
        info!(interval_ms = self.config.sweep_interval_ms, "session sweeper started");
    }

    /// Stops the background sweeper, waiting for it to finish.
    pub async fn shutdown(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
    }

    /// Executes `operation` through the middleware pipeline.
    ///
    /// # Errors
    ///
    /// Returns the uniform error envelope for any failure.
    pub async fn execute(
        &self,
        operation: &str,
        args: ValueMap,
        ctx: RequestContext,
    ) -> Result<Response, DispatchError> {
        self.execute_call(self.calls.call(operation, args, ctx)).await
    }

    /// Executes `operation` within one class through the middleware pipeline.
    ///
    /// # Errors
    ///
    /// Returns the uniform error envelope for any failure.
    pub async fn execute_in(
        &self,
        class: OperationClass,
        operation: &str,
        args: ValueMap,
        ctx: RequestContext,
    ) -> Result<Response, DispatchError> {
        self.execute_call(self.calls.call_in(class, operation, args, ctx))
            .await
    }

    /// Executes a prepared call through the middleware pipeline.
    ///
    /// # Errors
    ///
    /// Returns the uniform error envelope for any failure.
    pub async fn execute_call(&self, call: OperationCall) -> Result<Response, DispatchError> {
        self.pipeline.clone().oneshot(call).await
    }
}

fn session_defaults(config: &ServerConfig) -> SessionDefaults {
    SessionDefaults {
        locale: config.default_locale.clone(),
        permissions: config.anonymous_permissions.clone(),
        log_capacity: config.session_log_capacity,
        navigator_settings: NavigatorSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_runtime_serves_catalog() {
        let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
        assert_eq!(runtime.dispatcher().registry().len(), CORE_OPERATIONS.len());

        let resp = runtime
            .execute("serverConfig", ValueMap::new(), RequestContext::new("t"))
            .await
            .unwrap();
        assert!(resp.session_id.is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServerConfig {
            default_locale: "xx".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            Runtime::in_memory(config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[test]
    fn colliding_descriptors_are_rejected() {
        let config = ServerConfig::default();
        let backend = Arc::new(InMemoryBackend::new(&config));
        let store = Arc::new(InMemorySessionStore::new(
            config.session_ttl_ms,
            session_defaults(&config),
            config.supported_locales.clone(),
        ));
        let result = Runtime::with_operations(config, backend, store, CORE_OPERATIONS);
        assert!(matches!(
            result,
            Err(RuntimeError::Registry(RegistryError::Duplicate { .. }))
        ));
    }

    #[tokio::test]
    async fn start_and_shutdown_sweeper() {
        let mut runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
        runtime.start();
        runtime.start();
        runtime.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shared_runtime_serves_concurrent_callers() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Runtime>();

        let runtime = Arc::new(Runtime::in_memory(ServerConfig::default()).unwrap());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move {
                    runtime
                        .execute("openSession", ValueMap::new(), RequestContext::new(format!("c{i}")))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().session_id.is_some());
        }
        assert_eq!(runtime.dispatcher().env().sessions.session_count(), 16);
    }
}

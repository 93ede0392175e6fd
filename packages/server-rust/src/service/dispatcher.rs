//! The dispatcher: binds one inbound call to a descriptor, a session, and a
//! handler, and converts every failure into a [`DispatchError`] envelope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dsgate_core::{RequestContext, ValueMap};
use tower::Service;
use tracing::{debug, warn};

use super::args::Args;
use super::operation::{
    DispatchError, OperationCall, OperationClass, OperationError, Response, SessionRequirement,
};
use super::registry::{HandlerEnv, Invocation, OperationRegistry};
use crate::model::LogLevel;
use crate::session::Session;

/// Routes calls through the operation registry.
///
/// Cheap to clone: the registry and handler environment are shared.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    env: Arc<HandlerEnv>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry>, env: Arc<HandlerEnv>) -> Self {
        Self { registry, env }
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn env(&self) -> &Arc<HandlerEnv> {
        &self.env
    }

    /// Dispatches `operation`, resolving queries before mutations.
    ///
    /// # Errors
    ///
    /// Returns the uniform error envelope for any failure.
    pub async fn dispatch(
        &self,
        operation: &str,
        args: ValueMap,
        ctx: RequestContext,
    ) -> Result<Response, DispatchError> {
        self.execute(operation, None, &args, ctx).await
    }

    /// Dispatches a fully described call.
    ///
    /// # Errors
    ///
    /// Returns the uniform error envelope for any failure.
    pub async fn dispatch_call(&self, call: OperationCall) -> Result<Response, DispatchError> {
        self.execute(&call.operation, call.class, &call.args, call.ctx)
            .await
    }

    async fn execute(
        &self,
        operation: &str,
        class: Option<OperationClass>,
        args: &ValueMap,
        ctx: RequestContext,
    ) -> Result<Response, DispatchError> {
        let mut session = None;
        let result = self.run(operation, class, args, ctx, &mut session).await;
        result.map_err(|err| {
            if let Some(session) = &session {
                session.log(LogLevel::Error, format!("{operation}: {err}"));
            }
            match &err {
                OperationError::Handler(_) | OperationError::Internal(_) => {
                    warn!(operation, error = %err, "operation failed");
                }
                _ => debug!(operation, error = %err, "operation rejected"),
            }
            DispatchError::from_operation(operation, err)
        })
    }

    async fn run(
        &self,
        operation: &str,
        class: Option<OperationClass>,
        args: &ValueMap,
        ctx: RequestContext,
        session_slot: &mut Option<Arc<Session>>,
    ) -> Result<Response, OperationError> {
        let descriptor = match class {
            Some(class) => self.registry.lookup_in(class, operation)?,
            None => self.registry.lookup(operation)?,
        };

        let session = match descriptor.session {
            SessionRequirement::None | SessionRequirement::ContextOnly => None,
            SessionRequirement::Existing => Some(self.env.sessions.resolve(&ctx, false).await?),
            SessionRequirement::CreateIfAbsent => {
                Some(self.env.sessions.resolve(&ctx, true).await?)
            }
        };
        session_slot.clone_from(&session);

        let args = Args::extract(descriptor.args, args)?;
        let session_id = session.as_ref().map(|s| s.id().clone());
        let value = (descriptor.handler)(Invocation {
            env: Arc::clone(&self.env),
            session,
            args,
            ctx,
        })
        .await?;

        Ok(Response {
            operation: descriptor.name.to_string(),
            session_id,
            value,
        })
    }
}

impl Service<OperationCall> for Dispatcher {
    type Response = Response;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Response, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: OperationCall) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch_call(call).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use dsgate_core::{SessionId, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::service::catalog::CORE_OPERATIONS;
    use crate::service::config::ServerConfig;
    use crate::service::operation::ErrorCode;
    use crate::session::{InMemorySessionStore, SessionDefaults, SessionResolver};
    use crate::task::TaskTracker;

    fn dispatcher() -> Dispatcher {
        let config = ServerConfig::default();
        let store = InMemorySessionStore::new(
            config.session_ttl_ms,
            SessionDefaults {
                locale: config.default_locale.clone(),
                permissions: config.anonymous_permissions.clone(),
                log_capacity: config.session_log_capacity,
                navigator_settings: dsgate_core::NavigatorSettings::default(),
            },
            config.supported_locales.clone(),
        );
        let tasks = Arc::new(TaskTracker::new());
        let env = HandlerEnv {
            backend: Arc::new(InMemoryBackend::new(&config)),
            sessions: SessionResolver::new(Arc::new(store), Arc::clone(&tasks)),
            tasks,
        };
        let registry = OperationRegistry::build([CORE_OPERATIONS]).unwrap();
        Dispatcher::new(Arc::new(registry), Arc::new(env))
    }

    fn args(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    async fn open(d: &Dispatcher) -> RequestContext {
        let resp = d
            .dispatch("openSession", ValueMap::new(), RequestContext::new("t"))
            .await
            .unwrap();
        RequestContext::new("t").with_session(resp.session_id.unwrap())
    }

    #[tokio::test]
    async fn unknown_operation_regardless_of_session() {
        let d = dispatcher();
        let err = d
            .dispatch("dropDatabase", ValueMap::new(), RequestContext::new("t"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);

        let ctx = open(&d).await;
        let err = d
            .dispatch("dropDatabase", args(&[("id", Value::from("x"))]), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);
        assert_eq!(err.operation, "dropDatabase");
    }

    #[tokio::test]
    async fn server_config_needs_no_session() {
        let d = dispatcher();
        let resp = d
            .dispatch("serverConfig", ValueMap::new(), RequestContext::new("t"))
            .await
            .unwrap();
        assert!(resp.session_id.is_none());
        assert_eq!(resp.value.get("name").and_then(Value::as_str), Some("dsgate"));
    }

    #[tokio::test]
    async fn existing_session_is_required() {
        let d = dispatcher();
        let err = d
            .dispatch("sessionState", ValueMap::new(), RequestContext::new("t"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);

        let ghost = RequestContext::new("t").with_session(SessionId::from("ghost"));
        let err = d.dispatch("sessionState", ValueMap::new(), ghost).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn open_session_is_idempotent() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let again = d
            .dispatch("openSession", ValueMap::new(), ctx.clone())
            .await
            .unwrap();
        assert_eq!(again.session_id, ctx.session_id);
    }

    #[tokio::test]
    async fn missing_required_argument_is_argument_error() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let err = d
            .dispatch("connectionState", ValueMap::new(), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentError);
        assert!(err.message.contains("`id`"));
    }

    #[tokio::test]
    async fn bad_config_is_decode_error() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let mut config = ValueMap::new();
        config.insert("readOnly".to_string(), Value::from("maybe"));
        let err = d
            .dispatch("createConnection", args(&[("config", Value::Map(config))]), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DecodeError);
        assert!(err.message.contains("readOnly"));
    }

    #[tokio::test]
    async fn handler_failure_is_wrapped_and_logged() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let err = d
            .dispatch(
                "connectionInfo",
                args(&[("id", Value::from("missing"))]),
                ctx.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::HandlerError);
        assert_eq!(err.detail_code.as_deref(), Some("connection_not_found"));

        let log = d
            .dispatch("readSessionLog", ValueMap::new(), ctx)
            .await
            .unwrap();
        let entries = log.value.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get("level").and_then(Value::as_str), Some("error"));
    }

    #[tokio::test]
    async fn negative_max_entries_is_rejected() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let err = d
            .dispatch("readSessionLog", args(&[("maxEntries", Value::Int(-1))]), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentError);
    }

    #[tokio::test]
    async fn close_and_touch_use_raw_context() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let touched = d
            .dispatch("touchSession", ValueMap::new(), ctx.clone())
            .await
            .unwrap();
        assert_eq!(touched.value, Value::Bool(true));

        let closed = d
            .dispatch("closeSession", ValueMap::new(), ctx.clone())
            .await
            .unwrap();
        assert_eq!(closed.value, Value::Bool(true));

        let err = d.dispatch("touchSession", ValueMap::new(), ctx.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
        let closed_again = d.dispatch("closeSession", ValueMap::new(), ctx).await.unwrap();
        assert_eq!(closed_again.value, Value::Bool(false));
    }

    #[tokio::test]
    async fn class_can_be_pinned() {
        let d = dispatcher();
        let call = OperationCall {
            call_id: 1,
            operation: "serverConfig".to_string(),
            class: Some(OperationClass::Mutation),
            args: ValueMap::new(),
            ctx: RequestContext::new("t"),
            timeout_ms: 1000,
        };
        let err = d.clone().oneshot(call.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperation);

        let ok = d
            .oneshot(OperationCall {
                class: Some(OperationClass::Query),
                ..call
            })
            .await
            .unwrap();
        assert_eq!(ok.operation, "serverConfig");
    }

    #[tokio::test]
    async fn template_connection_is_created_by_id() {
        let d = dispatcher();
        let ctx = open(&d).await;
        let resp = d
            .dispatch(
                "createConnectionFromTemplate",
                args(&[("id", Value::from("sample-postgres"))]),
                ctx.clone(),
            )
            .await
            .unwrap();
        assert_eq!(resp.value.get("driverId").and_then(Value::as_str), Some("postgres"));
        assert_eq!(
            resp.value.get("templateId").and_then(Value::as_str),
            Some("sample-postgres")
        );

        let err = d
            .dispatch("createConnectionFromTemplate", ValueMap::new(), ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentError);
    }
}

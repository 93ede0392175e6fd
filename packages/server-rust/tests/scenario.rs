//! End-to-end flows through the assembled runtime and its middleware.

use std::sync::Arc;
use std::time::Duration;

use dsgate_core::{RequestContext, SessionId, Value, ValueMap};
use dsgate_server::service::{DispatchError, ErrorCode, Response, ServerConfig};
use dsgate_server::{InMemoryBackend, Runtime};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn args(value: serde_json::Value) -> ValueMap {
    match Value::from(value) {
        Value::Map(map) => map,
        other => panic!("expected an object, got {other:?}"),
    }
}

fn ctx(session: &SessionId) -> RequestContext {
    RequestContext::new("scenario").with_session(session.clone())
}

fn field<'a>(resp: &'a Response, name: &str) -> &'a Value {
    resp.value
        .get(name)
        .unwrap_or_else(|| panic!("response has no `{name}`: {:?}", resp.value))
}

fn text(resp: &Response, name: &str) -> String {
    field(resp, name)
        .as_str()
        .unwrap_or_else(|| panic!("`{name}` is not a string"))
        .to_string()
}

async fn open(runtime: &Runtime) -> SessionId {
    let resp = runtime
        .execute("openSession", ValueMap::new(), RequestContext::new("scenario"))
        .await
        .unwrap();
    resp.session_id.expect("openSession resolves a session")
}

fn slow_runtime(delay_ms: u64, config: ServerConfig) -> Runtime {
    let backend =
        InMemoryBackend::new(&config).with_connect_delay(Duration::from_millis(delay_ms));
    Runtime::in_memory_with_backend(config, Arc::new(backend)).unwrap()
}

async fn wait_for_status(
    runtime: &Runtime,
    session: &SessionId,
    task_id: &str,
    wanted: &str,
) -> Response {
    for _ in 0..200 {
        let resp = runtime
            .execute("asyncTaskStatus", args(json!({ "id": task_id })), ctx(session))
            .await
            .unwrap();
        if text(&resp, "status") == wanted {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {task_id} never reached {wanted}");
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_lifecycle_ends_in_not_found() {
    let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
    let session = open(&runtime).await;
    let config = json!({ "host": "db1", "port": 5432 });

    let created = runtime
        .execute("createConnection", args(json!({ "config": config })), ctx(&session))
        .await
        .unwrap();
    assert_eq!(created.session_id.as_ref(), Some(&session));
    let connection_id = text(&created, "id");
    assert_eq!(field(&created, "connected"), &Value::Bool(false));

    let tested = runtime
        .execute("testConnection", args(json!({ "config": config })), ctx(&session))
        .await
        .unwrap();
    assert_eq!(field(&tested, "connected"), &Value::Bool(true));

    // Testing leaves the created connection untouched.
    let state = runtime
        .execute("connectionState", args(json!({ "id": connection_id })), ctx(&session))
        .await
        .unwrap();
    assert_eq!(field(&state, "connected"), &Value::Bool(false));

    runtime
        .execute("closeConnection", args(json!({ "id": connection_id })), ctx(&session))
        .await
        .unwrap();

    let err = runtime
        .execute("connectionState", args(json!({ "id": connection_id })), ctx(&session))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::HandlerError);
    assert_eq!(err.detail_code.as_deref(), Some("connection_not_found"));
    assert_eq!(err.operation, "connectionState");
}

#[tokio::test]
async fn session_scoped_operations_require_a_session() {
    let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();

    let err = runtime
        .execute("sessionState", ValueMap::new(), RequestContext::new("anon"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionNotFound);

    let session = open(&runtime).await;
    let closed = runtime
        .execute("closeSession", ValueMap::new(), ctx(&session))
        .await
        .unwrap();
    assert_eq!(closed.value, Value::Bool(true));
    assert!(closed.session_id.is_none());

    let err = runtime
        .execute("sessionState", ValueMap::new(), ctx(&session))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionNotFound);
}

#[tokio::test]
async fn error_envelope_serializes_in_snake_case() {
    let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
    let err: DispatchError = runtime
        .execute("noSuchOperation", ValueMap::new(), RequestContext::new("t"))
        .await
        .unwrap_err();
    let wire = serde_json::to_value(&err).unwrap();
    assert_eq!(wire["code"], "unknown_operation");
    assert_eq!(wire["operation"], "noSuchOperation");
    assert!(wire.get("detailCode").is_none());
}

// ---------------------------------------------------------------------------
// Async tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn async_init_runs_to_finished_and_is_removed_once() {
    let runtime = slow_runtime(100, ServerConfig::default());
    let session = open(&runtime).await;

    let created = runtime
        .execute(
            "createConnection",
            args(json!({ "config": { "host": "db1", "port": 5432 } })),
            ctx(&session),
        )
        .await
        .unwrap();
    let connection_id = text(&created, "id");

    let started = runtime
        .execute("asyncInitConnection", args(json!({ "id": connection_id })), ctx(&session))
        .await
        .unwrap();
    let task_id = text(&started, "id");
    assert_eq!(text(&started, "name"), "initConnection");

    let running = wait_for_status(&runtime, &session, &task_id, "RUNNING").await;
    assert_eq!(field(&running, "running"), &Value::Bool(true));
    let finished = wait_for_status(&runtime, &session, &task_id, "FINISHED").await;
    assert_eq!(field(&finished, "running"), &Value::Bool(false));

    let info = runtime
        .execute(
            "asyncTaskInfo",
            args(json!({ "id": task_id, "removeOnFinish": true })),
            ctx(&session),
        )
        .await
        .unwrap();
    let result = field(&info, "result");
    assert_eq!(result.get("connected"), Some(&Value::Bool(true)));

    let err = runtime
        .execute(
            "asyncTaskInfo",
            args(json!({ "id": task_id, "removeOnFinish": true })),
            ctx(&session),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TaskNotFound);
}

#[tokio::test]
async fn cancel_reports_false_once_finished() {
    let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
    let session = open(&runtime).await;
    let created = runtime
        .execute(
            "createConnection",
            args(json!({ "config": { "host": "db1" } })),
            ctx(&session),
        )
        .await
        .unwrap();
    let started = runtime
        .execute(
            "asyncInitConnection",
            args(json!({ "id": text(&created, "id") })),
            ctx(&session),
        )
        .await
        .unwrap();
    let task_id = text(&started, "id");
    wait_for_status(&runtime, &session, &task_id, "FINISHED").await;

    let cancelled = runtime
        .execute("asyncTaskCancel", args(json!({ "id": task_id })), ctx(&session))
        .await
        .unwrap();
    assert_eq!(cancelled.value, Value::Bool(false));
}

#[tokio::test]
async fn cancel_while_running_ends_cancelled() {
    let runtime = slow_runtime(300, ServerConfig::default());
    let session = open(&runtime).await;
    let created = runtime
        .execute(
            "createConnection",
            args(json!({ "config": { "host": "db1" } })),
            ctx(&session),
        )
        .await
        .unwrap();
    let started = runtime
        .execute(
            "asyncInitConnection",
            args(json!({ "id": text(&created, "id") })),
            ctx(&session),
        )
        .await
        .unwrap();
    let task_id = text(&started, "id");
    wait_for_status(&runtime, &session, &task_id, "RUNNING").await;

    let cancelled = runtime
        .execute("asyncTaskCancel", args(json!({ "id": task_id })), ctx(&session))
        .await
        .unwrap();
    assert_eq!(cancelled.value, Value::Bool(true));
    wait_for_status(&runtime, &session, &task_id, "CANCELLED").await;

    // Stays cancelled after the body finishes its connect attempt.
    tokio::time::sleep(Duration::from_millis(350)).await;
    wait_for_status(&runtime, &session, &task_id, "CANCELLED").await;
}

#[tokio::test]
async fn tasks_are_invisible_to_other_sessions() {
    let runtime = slow_runtime(200, ServerConfig::default());
    let owner = open(&runtime).await;
    let other = open(&runtime).await;
    assert_ne!(owner, other);

    let created = runtime
        .execute(
            "createConnection",
            args(json!({ "config": { "host": "db1" } })),
            ctx(&owner),
        )
        .await
        .unwrap();
    let started = runtime
        .execute(
            "asyncInitConnection",
            args(json!({ "id": text(&created, "id") })),
            ctx(&owner),
        )
        .await
        .unwrap();
    let task_id = text(&started, "id");

    for operation in ["asyncTaskStatus", "asyncTaskInfo", "asyncTaskCancel"] {
        let err = runtime
            .execute(operation, args(json!({ "id": task_id })), ctx(&other))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound, "{operation}");
    }
}

#[tokio::test]
async fn async_init_of_unknown_connection_fails_the_call() {
    let runtime = Runtime::in_memory(ServerConfig::default()).unwrap();
    let session = open(&runtime).await;
    let err = runtime
        .execute("asyncInitConnection", args(json!({ "id": "missing" })), ctx(&session))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::HandlerError);
    assert_eq!(err.detail_code.as_deref(), Some("connection_not_found"));
    assert!(runtime.tasks().is_empty());
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_operation_times_out() {
    let config = ServerConfig {
        default_operation_timeout_ms: 50,
        ..ServerConfig::default()
    };
    let runtime = slow_runtime(300, config);
    let session = open(&runtime).await;

    let err = runtime
        .execute(
            "testConnection",
            args(json!({ "config": { "host": "db1" } })),
            ctx(&session),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(err.operation, "testConnection");
}

#[tokio::test]
async fn saturated_runtime_sheds_load() {
    let config = ServerConfig {
        max_concurrent_operations: 1,
        ..ServerConfig::default()
    };
    let runtime = Arc::new(slow_runtime(300, config));
    let session = open(&runtime).await;

    let slow = {
        let runtime = Arc::clone(&runtime);
        let ctx = ctx(&session);
        tokio::spawn(async move {
            runtime
                .execute(
                    "testConnection",
                    args(json!({ "config": { "host": "db1" } })),
                    ctx,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = runtime
        .execute("serverConfig", ValueMap::new(), RequestContext::new("t"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Overloaded);

    slow.await.unwrap().unwrap();
    runtime
        .execute("serverConfig", ValueMap::new(), RequestContext::new("t"))
        .await
        .unwrap();
}

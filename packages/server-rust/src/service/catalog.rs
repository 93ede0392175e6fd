//! The core operation catalog: a declarative descriptor table plus one thin
//! handler per operation forwarding to the backend, the session resolver, or
//! the task tracker.

use std::sync::Arc;

use dsgate_core::{ConnectionId, TaskId, Value};
use serde::Serialize;

use super::operation::{
    ArgSpec, ArgType, ArgumentError, HandlerError, OperationClass, OperationError, ResponseShape,
    SessionRequirement,
};
use super::registry::{HandlerFuture, Invocation, OperationDescriptor};
use crate::task::TaskStatus;

use OperationClass::{Mutation, Query};
use SessionRequirement::{ContextOnly, CreateIfAbsent, Existing};

const NO_ARGS: &[ArgSpec] = &[];
const ID: &[ArgSpec] = &[ArgSpec::required("id", ArgType::String)];
const OPT_ID: &[ArgSpec] = &[ArgSpec::optional("id", ArgType::String)];
const CONFIG: &[ArgSpec] = &[ArgSpec::required("config", ArgType::ConnectionConfig)];
const ID_CREDENTIALS: &[ArgSpec] = &[
    ArgSpec::required("id", ArgType::String),
    ArgSpec::optional("credentials", ArgType::Map),
];
const READ_LOG: &[ArgSpec] = &[
    ArgSpec::optional("maxEntries", ArgType::Int),
    ArgSpec::optional("clearEntries", ArgType::Bool),
];
const LOCALE: &[ArgSpec] = &[ArgSpec::optional("locale", ArgType::String)];
const ID_SETTINGS: &[ArgSpec] = &[
    ArgSpec::required("id", ArgType::String),
    ArgSpec::required("settings", ArgType::NavigatorSettings),
];
const SETTINGS: &[ArgSpec] = &[ArgSpec::required("settings", ArgType::NavigatorSettings)];
const TASK_INFO: &[ArgSpec] = &[
    ArgSpec::required("id", ArgType::String),
    ArgSpec::optional("removeOnFinish", ArgType::Bool),
];

const fn op(
    name: &'static str,
    class: OperationClass,
    session: SessionRequirement,
    args: &'static [ArgSpec],
    response: ResponseShape,
    handler: fn(Invocation) -> HandlerFuture,
) -> OperationDescriptor {
    OperationDescriptor {
        name,
        class,
        session,
        args,
        response,
        handler,
    }
}

/// Every operation the core exposes.
pub const CORE_OPERATIONS: &[OperationDescriptor] = &[
    // ----- queries -----
    op("serverConfig", Query, SessionRequirement::None, NO_ARGS, ResponseShape::Object, server_config),
    op("driverList", Query, Existing, OPT_ID, ResponseShape::List, driver_list),
    op("authModels", Query, Existing, NO_ARGS, ResponseShape::List, auth_models),
    op("templateDataSources", Query, SessionRequirement::None, NO_ARGS, ResponseShape::List, template_data_sources),
    op("templateConnections", Query, Existing, NO_ARGS, ResponseShape::List, template_connections),
    op("sessionPermissions", Query, Existing, NO_ARGS, ResponseShape::List, session_permissions),
    op("sessionState", Query, Existing, NO_ARGS, ResponseShape::Object, session_state),
    op("connectionState", Query, Existing, ID, ResponseShape::Object, connection_info),
    op("connectionInfo", Query, Existing, ID, ResponseShape::Object, connection_info),
    op(
        "readSessionLog",
        Query,
        Existing,
        READ_LOG,
        ResponseShape::List,
        read_session_log,
    ),
    // ----- mutations -----
    op("openSession", Mutation, CreateIfAbsent, NO_ARGS, ResponseShape::Object, open_session),
    op("closeSession", Mutation, ContextOnly, NO_ARGS, ResponseShape::Boolean, close_session),
    op("touchSession", Mutation, ContextOnly, NO_ARGS, ResponseShape::Boolean, touch_session),
    op(
        "changeSessionLanguage",
        Mutation,
        Existing,
        LOCALE,
        ResponseShape::Boolean,
        change_session_language,
    ),
    op("openConnection", Mutation, Existing, CONFIG, ResponseShape::Object, open_connection),
    op("createConnection", Mutation, Existing, CONFIG, ResponseShape::Object, create_connection),
    op(
        "createConnectionFromTemplate",
        Mutation,
        Existing,
        ID,
        ResponseShape::Object,
        create_connection_from_template,
    ),
    op("initConnection", Mutation, Existing, ID_CREDENTIALS, ResponseShape::Object, init_connection),
    op("asyncInitConnection", Mutation, Existing, ID_CREDENTIALS, ResponseShape::TaskHandle, async_init_connection),
    op("testConnection", Mutation, Existing, CONFIG, ResponseShape::Object, test_connection),
    op("closeConnection", Mutation, Existing, ID, ResponseShape::Object, close_connection),
    op("deleteConnection", Mutation, Existing, ID, ResponseShape::Boolean, delete_connection),
    op(
        "setConnectionNavigatorSettings",
        Mutation,
        Existing,
        ID_SETTINGS,
        ResponseShape::Object,
        set_connection_navigator_settings,
    ),
    op(
        "setDefaultNavigatorSettings",
        Mutation,
        Existing,
        SETTINGS,
        ResponseShape::Boolean,
        set_default_navigator_settings,
    ),
    op("asyncTaskStatus", Mutation, Existing, ID, ResponseShape::Object, async_task_status),
    op(
        "asyncTaskInfo",
        Mutation,
        Existing,
        TASK_INFO,
        ResponseShape::Object,
        async_task_info,
    ),
    op("asyncTaskCancel", Mutation, Existing, ID, ResponseShape::Boolean, async_task_cancel),
];

fn respond<T: Serialize + ?Sized>(value: &T) -> Result<Value, OperationError> {
    Value::from_serialize(value).map_err(|err| OperationError::Internal(err.into()))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn server_config(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.env.backend.server_config().await?) })
}

fn driver_list(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let session = inv.session()?;
        let id = inv.args.opt_str("id")?;
        respond(&inv.env.backend.driver_list(session, id).await?)
    })
}

fn auth_models(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.env.backend.auth_models(inv.session()?).await?) })
}

fn template_data_sources(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.env.backend.template_data_sources().await?) })
}

fn template_connections(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        respond(&inv.env.backend.template_connections(inv.session()?).await?)
    })
}

fn session_permissions(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        respond(&inv.env.backend.session_permissions(inv.session()?).await?)
    })
}

fn session_state(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.session()?.info()) })
}

fn connection_info(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = ConnectionId::from(inv.args.str("id")?);
        respond(&inv.env.backend.connection_info(inv.session()?, &id).await?)
    })
}

fn read_session_log(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let max_entries = inv
            .args
            .opt_i64("maxEntries")?
            .map(|n| {
                usize::try_from(n).map_err(|_| ArgumentError::Type {
                    name: "maxEntries",
                    expected: "non-negative integer",
                    found: "negative integer",
                })
            })
            .transpose()?;
        let clear = inv.args.opt_bool("clearEntries")?.unwrap_or(false);
        respond(&inv.session()?.read_log(max_entries, clear))
    })
}

// ---------------------------------------------------------------------------
// Session mutations
// ---------------------------------------------------------------------------

fn open_session(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.session()?.info()) })
}

fn close_session(inv: Invocation) -> HandlerFuture {
    Box::pin(async move { respond(&inv.env.sessions.close(&inv.ctx).await) })
}

fn touch_session(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        inv.env.sessions.touch(&inv.ctx).await?;
        respond(&true)
    })
}

fn change_session_language(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let locale = inv.args.opt_str("locale")?;
        respond(
            &inv.env
                .backend
                .change_session_language(inv.session()?, locale)
                .await?,
        )
    })
}

// ---------------------------------------------------------------------------
// Connection mutations
// ---------------------------------------------------------------------------

fn open_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let config = inv.args.connection_config("config")?.clone();
        respond(&inv.env.backend.open_connection(inv.session()?, config).await?)
    })
}

fn create_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let config = inv.args.connection_config("config")?.clone();
        respond(&inv.env.backend.create_connection(inv.session()?, config).await?)
    })
}

fn create_connection_from_template(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let template_id = inv.args.str("id")?;
        respond(
            &inv.env
                .backend
                .create_connection_from_template(inv.session()?, template_id)
                .await?,
        )
    })
}

fn init_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = ConnectionId::from(inv.args.str("id")?);
        let credentials = inv.args.opt_map("credentials")?.cloned();
        respond(
            &inv.env
                .backend
                .init_connection(inv.session()?, &id, credentials)
                .await?,
        )
    })
}

fn async_init_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let session = Arc::clone(inv.session()?);
        let id = ConnectionId::from(inv.args.str("id")?);
        let credentials = inv.args.opt_map("credentials")?.cloned();
        // An unknown connection fails the call itself, not the task.
        inv.env.backend.connection_info(&session, &id).await?;

        let backend = Arc::clone(&inv.env.backend);
        let owner = Arc::clone(&session);
        let task_id = inv.env.tasks.start(&session, "initConnection", move |ctx| async move {
            ctx.checkpoint()?;
            let info = backend.init_connection(&owner, &id, credentials).await?;
            Value::from_serialize(&info).map_err(|err| HandlerError::new("internal", err.to_string()))
        });
        respond(&inv.env.tasks.info(&session, &task_id, false)?)
    })
}

fn test_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let config = inv.args.connection_config("config")?.clone();
        respond(&inv.env.backend.test_connection(inv.session()?, config).await?)
    })
}

fn close_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = ConnectionId::from(inv.args.str("id")?);
        respond(&inv.env.backend.close_connection(inv.session()?, &id).await?)
    })
}

fn delete_connection(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = ConnectionId::from(inv.args.str("id")?);
        respond(&inv.env.backend.delete_connection(inv.session()?, &id).await?)
    })
}

fn set_connection_navigator_settings(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = ConnectionId::from(inv.args.str("id")?);
        let settings = inv.args.navigator_settings("settings")?;
        respond(
            &inv.env
                .backend
                .set_connection_navigator_settings(inv.session()?, &id, settings)
                .await?,
        )
    })
}

fn set_default_navigator_settings(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let settings = inv.args.navigator_settings("settings")?;
        respond(
            &inv.env
                .backend
                .set_default_navigator_settings(inv.session()?, settings)
                .await?,
        )
    })
}

// ---------------------------------------------------------------------------
// Task mutations
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TaskStatusView<'a> {
    id: &'a TaskId,
    status: TaskStatus,
    running: bool,
}

fn async_task_status(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = TaskId::from(inv.args.str("id")?);
        let status = inv.env.tasks.status(inv.session()?, &id)?;
        respond(&TaskStatusView {
            id: &id,
            status,
            running: !status.is_terminal(),
        })
    })
}

fn async_task_info(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = TaskId::from(inv.args.str("id")?);
        let remove = inv.args.opt_bool("removeOnFinish")?.unwrap_or(false);
        respond(&inv.env.tasks.info(inv.session()?, &id, remove)?)
    })
}

fn async_task_cancel(inv: Invocation) -> HandlerFuture {
    Box::pin(async move {
        let id = TaskId::from(inv.args.str("id")?);
        respond(&inv.env.tasks.cancel(inv.session()?, &id)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::registry::OperationRegistry;

    #[test]
    fn catalog_builds_without_duplicates() {
        let registry = OperationRegistry::build([CORE_OPERATIONS]).unwrap();
        assert_eq!(registry.len(), CORE_OPERATIONS.len());
    }

    #[test]
    fn lookup_is_stable() {
        let registry = OperationRegistry::build([CORE_OPERATIONS]).unwrap();
        for (_, name) in registry.names() {
            let first = registry.lookup(name).unwrap();
            let second = registry.lookup(name).unwrap();
            assert!(std::ptr::eq(first, second));
            assert_eq!(first.name, name);
        }
    }

    #[test]
    fn session_requirements_follow_the_catalog_rules() {
        let registry = OperationRegistry::build([CORE_OPERATIONS]).unwrap();
        let requirement = |name: &str| registry.lookup(name).unwrap().session;

        assert_eq!(requirement("serverConfig"), SessionRequirement::None);
        assert_eq!(requirement("templateDataSources"), SessionRequirement::None);
        assert_eq!(requirement("openSession"), CreateIfAbsent);
        assert_eq!(requirement("closeSession"), ContextOnly);
        assert_eq!(requirement("touchSession"), ContextOnly);
        assert_eq!(requirement("createConnection"), Existing);
        assert_eq!(requirement("asyncTaskInfo"), Existing);
    }

    #[test]
    fn only_async_operations_return_task_handles() {
        let handles: Vec<&str> = CORE_OPERATIONS
            .iter()
            .filter(|d| d.response == ResponseShape::TaskHandle)
            .map(|d| d.name)
            .collect();
        assert_eq!(handles, vec!["asyncInitConnection"]);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use dsgate_core::{ConnectionConfig, ConnectionId, NavigatorSettings, RequestContext, SessionId, ValueMap};

use crate::model::{
    AuthModel, ConnectionInfo, ConnectionTestResult, DataSourceTemplate, DriverInfo, ServerInfo,
};
use crate::service::operation::HandlerError;
use crate::session::{Session, SessionError};

/// Backing store for sessions.
/// Implementations: in-memory (default); persistent stores are external.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve the session referenced by `ctx`, refreshing its last-touch time.
    ///
    /// With `create_if_absent`, a missing or expired session is replaced by a
    /// new one. Without it, a missing id yields `NotFound` and an expired one
    /// is destroyed and yields `Expired`.
    async fn get_session(
        &self,
        ctx: &RequestContext,
        create_if_absent: bool,
    ) -> Result<Arc<Session>, SessionError>;

    /// Destroy the session referenced by `ctx`, returning it if it existed.
    async fn close_session(&self, ctx: &RequestContext) -> Option<Arc<Session>>;

    /// Refresh the last-touch time only. Same failure rules as `get_session`
    /// without creation.
    async fn touch_session(&self, ctx: &RequestContext) -> Result<(), SessionError>;

    /// Remove every expired session, returning their ids.
    async fn evict_expired(&self) -> Vec<SessionId>;

    /// Number of live sessions.
    fn count(&self) -> usize;
}

/// Domain logic behind the core operation catalog.
///
/// The dispatcher only forwards to these methods; connection establishment,
/// driver listings, and credential checks all live behind this trait.
#[async_trait]
pub trait CoreBackend: Send + Sync {
    async fn server_config(&self) -> Result<ServerInfo, HandlerError>;

    /// All drivers, or only the one matching `id`.
    async fn driver_list(
        &self,
        session: &Session,
        id: Option<&str>,
    ) -> Result<Vec<DriverInfo>, HandlerError>;

    async fn auth_models(&self, session: &Session) -> Result<Vec<AuthModel>, HandlerError>;

    async fn template_data_sources(&self) -> Result<Vec<DataSourceTemplate>, HandlerError>;

    async fn template_connections(
        &self,
        session: &Session,
    ) -> Result<Vec<ConnectionInfo>, HandlerError>;

    async fn session_permissions(&self, session: &Session) -> Result<Vec<String>, HandlerError>;

    /// Switch the session locale; `None` restores the server default.
    async fn change_session_language(
        &self,
        session: &Session,
        locale: Option<&str>,
    ) -> Result<bool, HandlerError>;

    async fn connection_info(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<ConnectionInfo, HandlerError>;

    /// Create a connection and connect it immediately.
    async fn open_connection(
        &self,
        session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionInfo, HandlerError>;

    /// Create a connection without connecting.
    async fn create_connection(
        &self,
        session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionInfo, HandlerError>;

    async fn create_connection_from_template(
        &self,
        session: &Session,
        template_id: &str,
    ) -> Result<ConnectionInfo, HandlerError>;

    /// Connect an existing connection, optionally with fresh credentials.
    async fn init_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
        credentials: Option<ValueMap>,
    ) -> Result<ConnectionInfo, HandlerError>;

    /// Probe a configuration without creating or modifying any connection.
    async fn test_connection(
        &self,
        session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionTestResult, HandlerError>;

    /// Disconnect and drop the connection from the session.
    async fn close_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<ConnectionInfo, HandlerError>;

    async fn delete_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<bool, HandlerError>;

    async fn set_connection_navigator_settings(
        &self,
        session: &Session,
        id: &ConnectionId,
        settings: NavigatorSettings,
    ) -> Result<ConnectionInfo, HandlerError>;

    async fn set_default_navigator_settings(
        &self,
        session: &Session,
        settings: NavigatorSettings,
    ) -> Result<bool, HandlerError>;
}

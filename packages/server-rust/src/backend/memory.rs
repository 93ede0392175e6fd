//! In-memory reference [`CoreBackend`].
//!
//! Serves a fixed driver, auth-model, and template catalog and simulates
//! connection establishment: an endpoint is reachable unless its host was
//! marked unreachable, and drivers that require credentials need a `user`
//! entry. No network I/O is performed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashSet;
use dsgate_core::{ConnectionConfig, ConnectionId, NavigatorSettings, ValueMap};
use tracing::debug;
use uuid::Uuid;

use super::codes;
use crate::model::{
    AuthModel, ConnectionInfo, ConnectionTestResult, DataSourceTemplate, DriverInfo, LogLevel,
    ServerInfo, ServerLanguage,
};
use crate::service::config::ServerConfig;
use crate::service::operation::HandlerError;
use crate::session::{now_millis, ConnectionRecord, Session};
use crate::traits::CoreBackend;

/// Reference backend for tests and the replay tool.
pub struct InMemoryBackend {
    config: ServerConfig,
    drivers: Vec<DriverInfo>,
    auth_models: Vec<AuthModel>,
    templates: Vec<DataSourceTemplate>,
    unreachable_hosts: DashSet<String>,
    connect_delay: Duration,
}

impl InMemoryBackend {
    /// Creates a backend with the built-in catalog.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            config: config.clone(),
            drivers: builtin_drivers(),
            auth_models: vec![AuthModel {
                id: "native".to_string(),
                display_name: "Database Native".to_string(),
                description: "User name and password checked by the database".to_string(),
            }],
            templates: vec![DataSourceTemplate {
                id: "sample-postgres".to_string(),
                driver_id: "postgres".to_string(),
                name: "Sample PostgreSQL".to_string(),
                description: Some("Demo database".to_string()),
                host: Some("localhost".to_string()),
                port: Some(5432),
                database_name: Some("postgres".to_string()),
            }],
            unreachable_hosts: DashSet::new(),
            connect_delay: Duration::ZERO,
        }
    }

    /// Simulated latency of every connect and test attempt.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Makes every later attempt to reach `host` fail.
    pub fn mark_unreachable(&self, host: impl Into<String>) {
        self.unreachable_hosts.insert(host.into());
    }

    fn driver(&self, id: &str) -> Result<&DriverInfo, HandlerError> {
        self.drivers.iter().find(|d| d.id == id).ok_or_else(|| {
            HandlerError::new(codes::DRIVER_NOT_FOUND, format!("unknown driver `{id}`"))
        })
    }

    /// Validates that `config` names a known driver, if any.
    fn check_driver(&self, config: &ConnectionConfig) -> Result<Option<&DriverInfo>, HandlerError> {
        config.driver_id.as_deref().map(|id| self.driver(id)).transpose()
    }

    /// Simulates one connect attempt against the endpoint in `config`.
    async fn probe(
        &self,
        config: &ConnectionConfig,
        credentials: &ValueMap,
    ) -> Result<(), HandlerError> {
        let driver = self.check_driver(config)?;
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let embedded = driver.is_some_and(|d| d.embedded);
        let endpoint = config.host.as_deref().or(config.url.as_deref());
        match endpoint {
            Some(host) if self.unreachable_hosts.contains(host) => {
                return Err(HandlerError::new(
                    codes::CONNECT_FAILED,
                    format!("cannot reach {host}"),
                ));
            }
            Some(_) => {}
            None if embedded && config.database_name.is_some() => {}
            None => {
                return Err(HandlerError::new(
                    codes::INVALID_CONFIGURATION,
                    "connection has no host or url",
                ));
            }
        }

        if driver.is_some_and(|d| d.requires_credentials) && !credentials.contains_key("user") {
            return Err(HandlerError::new(
                codes::CREDENTIALS_REQUIRED,
                "this driver requires a user name",
            ));
        }
        Ok(())
    }

    fn record(session: &Session, id: &ConnectionId) -> Result<ConnectionRecord, HandlerError> {
        session.connection(id).ok_or_else(|| not_found(id))
    }

    fn insert(&self, session: &Session, config: ConnectionConfig) -> ConnectionInfo {
        let id = ConnectionId::new(Uuid::new_v4().to_string());
        let record = ConnectionRecord::new(id.clone(), config, session.navigator_defaults());
        let info = record.info();
        session.insert_connection(record);
        session.log(LogLevel::Info, format!("connection {id} created"));
        debug!(session_id = %session.id(), connection_id = %id, "connection created");
        info
    }
}

fn not_found(id: &ConnectionId) -> HandlerError {
    HandlerError::new(
        codes::CONNECTION_NOT_FOUND,
        format!("connection {id} not found"),
    )
}

fn language_name(code: &str) -> String {
    match code {
        "en" => "English",
        "de" => "Deutsch",
        "fr" => "Français",
        "ru" => "Русский",
        "zh" => "中文",
        other => other,
    }
    .to_string()
}

fn builtin_drivers() -> Vec<DriverInfo> {
    let server = |id: &str, name: &str, port: u16, url: &str| DriverInfo {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{name} JDBC-compatible driver"),
        provider_id: "generic".to_string(),
        default_port: Some(port),
        sample_url: Some(url.to_string()),
        embedded: false,
        requires_credentials: true,
        auth_models: vec!["native".to_string()],
    };
    vec![
        server("postgres", "PostgreSQL", 5432, "jdbc:postgresql://{host}[:{port}]/[{database}]"),
        server("mysql", "MySQL", 3306, "jdbc:mysql://{host}[:{port}]/[{database}]"),
        server("sqlserver", "SQL Server", 1433, "jdbc:sqlserver://{host}[:{port}]"),
        DriverInfo {
            id: "sqlite".to_string(),
            name: "SQLite".to_string(),
            description: "Embedded file database".to_string(),
            provider_id: "generic".to_string(),
            default_port: None,
            sample_url: Some("jdbc:sqlite:{file}".to_string()),
            embedded: true,
            requires_credentials: false,
            auth_models: Vec::new(),
        },
    ]
}

#[async_trait]
impl CoreBackend for InMemoryBackend {
    async fn server_config(&self) -> Result<ServerInfo, HandlerError> {
        Ok(ServerInfo {
            name: self.config.server_name.clone(),
            version: self.config.server_version.clone(),
            anonymous_access_enabled: true,
            supported_languages: self
                .config
                .supported_locales
                .iter()
                .map(|code| ServerLanguage {
                    iso_code: code.clone(),
                    display_name: language_name(code),
                })
                .collect(),
            default_locale: self.config.default_locale.clone(),
            session_expire_time_seconds: self.config.session_ttl_ms / 1000,
            default_navigator_settings: NavigatorSettings::default(),
        })
    }

    async fn driver_list(
        &self,
        _session: &Session,
        id: Option<&str>,
    ) -> Result<Vec<DriverInfo>, HandlerError> {
        Ok(self
            .drivers
            .iter()
            .filter(|d| id.map_or(true, |id| d.id == id))
            .cloned()
            .collect())
    }

    async fn auth_models(&self, _session: &Session) -> Result<Vec<AuthModel>, HandlerError> {
        Ok(self.auth_models.clone())
    }

    async fn template_data_sources(&self) -> Result<Vec<DataSourceTemplate>, HandlerError> {
        Ok(self.templates.clone())
    }

    async fn template_connections(
        &self,
        session: &Session,
    ) -> Result<Vec<ConnectionInfo>, HandlerError> {
        Ok(session
            .connections()
            .iter()
            .filter(|r| r.config.template_id.is_some())
            .map(ConnectionRecord::info)
            .collect())
    }

    async fn session_permissions(&self, session: &Session) -> Result<Vec<String>, HandlerError> {
        Ok(session.permissions().to_vec())
    }

    async fn change_session_language(
        &self,
        session: &Session,
        locale: Option<&str>,
    ) -> Result<bool, HandlerError> {
        let locale = locale.unwrap_or(&self.config.default_locale);
        if !self.config.supported_locales.iter().any(|l| l == locale) {
            return Err(HandlerError::new(
                codes::UNSUPPORTED_LOCALE,
                format!("locale `{locale}` is not supported"),
            ));
        }
        session.set_locale(locale);
        Ok(true)
    }

    async fn connection_info(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<ConnectionInfo, HandlerError> {
        Self::record(session, id).map(|r| r.info())
    }

    async fn open_connection(
        &self,
        session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionInfo, HandlerError> {
        // Nothing is stored unless the first connect succeeds.
        self.probe(&config, &config.credentials).await?;
        let id = self.create_connection(session, config).await?.id;
        session
            .update_connection(&id, |r| {
                r.connected = true;
                r.connect_time = Some(now_millis());
            })
            .map(|r| r.info())
            .ok_or_else(|| not_found(&id))
    }

    async fn create_connection(
        &self,
        session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionInfo, HandlerError> {
        self.check_driver(&config)?;
        Ok(self.insert(session, config))
    }

    async fn create_connection_from_template(
        &self,
        session: &Session,
        template_id: &str,
    ) -> Result<ConnectionInfo, HandlerError> {
        let template = self
            .templates
            .iter()
            .find(|t| t.id == template_id)
            .ok_or_else(|| {
                HandlerError::new(
                    codes::TEMPLATE_NOT_FOUND,
                    format!("template `{template_id}` not found"),
                )
            })?;
        let config = ConnectionConfig {
            template_id: Some(template.id.clone()),
            driver_id: Some(template.driver_id.clone()),
            name: Some(template.name.clone()),
            description: template.description.clone(),
            host: template.host.clone(),
            port: template.port,
            database_name: template.database_name.clone(),
            ..ConnectionConfig::default()
        };
        Ok(self.insert(session, config))
    }

    async fn init_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
        credentials: Option<ValueMap>,
    ) -> Result<ConnectionInfo, HandlerError> {
        let record = Self::record(session, id)?;
        let credentials = credentials.unwrap_or_else(|| record.config.credentials.clone());
        if let Err(err) = self.probe(&record.config, &credentials).await {
            session.log(LogLevel::Warn, format!("connection {id}: {}", err.message));
            return Err(err);
        }

        let updated = session
            .update_connection(id, |r| {
                r.connected = true;
                r.connect_time = Some(now_millis());
                if r.config.save_credentials {
                    r.config.credentials = credentials;
                }
            })
            // Closed while the connect attempt was in flight.
            .ok_or_else(|| not_found(id))?;
        session.log(LogLevel::Info, format!("connection {id} connected"));
        debug!(session_id = %session.id(), connection_id = %id, "connection initialized");
        Ok(updated.info())
    }

    async fn test_connection(
        &self,
        _session: &Session,
        config: ConnectionConfig,
    ) -> Result<ConnectionTestResult, HandlerError> {
        let started = Instant::now();
        let outcome = self.probe(&config, &config.credentials).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(ConnectionTestResult {
            connected: outcome.is_ok(),
            message: match outcome {
                Ok(()) => "connected".to_string(),
                Err(err) => err.message,
            },
            driver_id: config.driver_id,
            elapsed_ms,
        })
    }

    async fn close_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<ConnectionInfo, HandlerError> {
        let mut record = session.remove_connection(id).ok_or_else(|| not_found(id))?;
        record.connected = false;
        session.log(LogLevel::Info, format!("connection {id} closed"));
        debug!(session_id = %session.id(), connection_id = %id, "connection closed");
        Ok(record.info())
    }

    async fn delete_connection(
        &self,
        session: &Session,
        id: &ConnectionId,
    ) -> Result<bool, HandlerError> {
        session.remove_connection(id).ok_or_else(|| not_found(id))?;
        session.log(LogLevel::Info, format!("connection {id} deleted"));
        Ok(true)
    }

    async fn set_connection_navigator_settings(
        &self,
        session: &Session,
        id: &ConnectionId,
        settings: NavigatorSettings,
    ) -> Result<ConnectionInfo, HandlerError> {
        session
            .update_connection(id, |r| r.navigator_settings = settings)
            .map(|r| r.info())
            .ok_or_else(|| not_found(id))
    }

    async fn set_default_navigator_settings(
        &self,
        session: &Session,
        settings: NavigatorSettings,
    ) -> Result<bool, HandlerError> {
        session.set_navigator_defaults(settings);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use dsgate_core::{SessionId, Value};

    use super::*;
    use crate::session::SessionDefaults;

    fn backend() -> InMemoryBackend {
        let config = ServerConfig {
            supported_locales: vec!["en".to_string(), "ru".to_string()],
            ..ServerConfig::default()
        };
        InMemoryBackend::new(&config)
    }

    fn session() -> Session {
        Session::new(
            SessionId::from("s1"),
            "en".to_string(),
            &SessionDefaults {
                locale: "en".to_string(),
                permissions: vec!["public".to_string()],
                log_capacity: 32,
                navigator_settings: NavigatorSettings::default(),
            },
        )
    }

    fn endpoint(host: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: Some(host.to_string()),
            port: Some(5432),
            ..ConnectionConfig::default()
        }
    }

    fn credentials(user: &str) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("user".to_string(), Value::from(user));
        map
    }

    #[tokio::test]
    async fn create_then_close_removes_connection() {
        let backend = backend();
        let s = session();
        let info = backend.create_connection(&s, endpoint("db1")).await.unwrap();
        assert!(!info.connected);
        assert_eq!(info.name, "db1:5432");

        let closed = backend.close_connection(&s, &info.id).await.unwrap();
        assert!(!closed.connected);
        let err = backend.connection_info(&s, &info.id).await.unwrap_err();
        assert_eq!(err.code, codes::CONNECTION_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_does_not_touch_session() {
        let backend = backend();
        let s = session();
        backend.mark_unreachable("down");

        let ok = backend.test_connection(&s, endpoint("db1")).await.unwrap();
        assert!(ok.connected);
        let failed = backend.test_connection(&s, endpoint("down")).await.unwrap();
        assert!(!failed.connected);
        assert!(failed.message.contains("down"));
        assert!(s.connections().is_empty());
    }

    #[tokio::test]
    async fn init_requires_credentials_for_server_drivers() {
        let backend = backend();
        let s = session();
        let config = ConnectionConfig {
            driver_id: Some("postgres".to_string()),
            ..endpoint("db1")
        };
        let id = backend.create_connection(&s, config).await.unwrap().id;

        let err = backend.init_connection(&s, &id, None).await.unwrap_err();
        assert_eq!(err.code, codes::CREDENTIALS_REQUIRED);

        let info = backend
            .init_connection(&s, &id, Some(credentials("admin")))
            .await
            .unwrap();
        assert!(info.connected);
        assert!(info.connect_time.is_some());
    }

    #[tokio::test]
    async fn unknown_driver_is_rejected_on_create() {
        let backend = backend();
        let config = ConnectionConfig {
            driver_id: Some("oracle".to_string()),
            ..endpoint("db1")
        };
        let err = backend.create_connection(&session(), config).await.unwrap_err();
        assert_eq!(err.code, codes::DRIVER_NOT_FOUND);
    }

    #[tokio::test]
    async fn open_connection_stores_nothing_on_failure() {
        let backend = backend();
        let s = session();
        backend.mark_unreachable("down");
        assert!(backend.open_connection(&s, endpoint("down")).await.is_err());
        assert!(s.connections().is_empty());

        let info = backend.open_connection(&s, endpoint("db1")).await.unwrap();
        assert!(info.connected);
    }

    #[tokio::test]
    async fn template_connections_come_from_templates() {
        let backend = backend();
        let s = session();
        backend.create_connection(&s, endpoint("db1")).await.unwrap();
        let from_template = backend
            .create_connection_from_template(&s, "sample-postgres")
            .await
            .unwrap();
        assert_eq!(from_template.driver_id.as_deref(), Some("postgres"));

        let templated = backend.template_connections(&s).await.unwrap();
        assert_eq!(templated.len(), 1);
        assert_eq!(templated[0].id, from_template.id);

        let err = backend
            .create_connection_from_template(&s, "nope")
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TEMPLATE_NOT_FOUND);
    }

    #[tokio::test]
    async fn language_change_validates_locale() {
        let backend = backend();
        let s = session();
        assert!(backend.change_session_language(&s, Some("ru")).await.unwrap());
        assert_eq!(s.locale().as_str(), "ru");

        let err = backend
            .change_session_language(&s, Some("xx"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED_LOCALE);

        backend.change_session_language(&s, None).await.unwrap();
        assert_eq!(s.locale().as_str(), "en");
    }

    #[tokio::test]
    async fn driver_list_filters_by_id() {
        let backend = backend();
        let s = session();
        assert_eq!(backend.driver_list(&s, None).await.unwrap().len(), 4);
        let only = backend.driver_list(&s, Some("mysql")).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].default_port, Some(3306));
        assert!(backend.driver_list(&s, Some("nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn navigator_settings_apply_per_connection() {
        let backend = backend();
        let s = session();
        let id = backend.create_connection(&s, endpoint("db1")).await.unwrap().id;
        let settings = NavigatorSettings {
            show_system_objects: true,
            ..NavigatorSettings::default()
        };
        let info = backend
            .set_connection_navigator_settings(&s, &id, settings)
            .await
            .unwrap();
        assert!(info.navigator_settings.show_system_objects);
        assert!(!s.navigator_defaults().show_system_objects);
    }
}

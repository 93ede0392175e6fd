//! Response payloads exchanged with backends and returned to callers.
//!
//! All types serialize with camelCase field names, matching the public
//! operation schema.

use dsgate_core::{ConnectionId, NavigatorSettings, SessionId};
use serde::Serialize;

/// A UI language the server offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLanguage {
    pub iso_code: String,
    pub display_name: String,
}

/// Server-wide information returned by `serverConfig`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub anonymous_access_enabled: bool,
    pub supported_languages: Vec<ServerLanguage>,
    pub default_locale: String,
    pub session_expire_time_seconds: u64,
    pub default_navigator_settings: NavigatorSettings,
}

/// A database driver known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provider_id: String,
    pub default_port: Option<u16>,
    pub sample_url: Option<String>,
    pub embedded: bool,
    pub requires_credentials: bool,
    pub auth_models: Vec<String>,
}

/// An authentication model a driver can use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthModel {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

/// A predefined data source that sessions can instantiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceTemplate {
    pub id: String,
    pub driver_id: String,
    pub name: String,
    pub description: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_name: Option<String>,
}

/// Public view of a session-owned connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub driver_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub folder: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_name: Option<String>,
    pub template: bool,
    pub template_id: Option<String>,
    pub read_only: bool,
    pub connected: bool,
    pub connect_time: Option<u64>,
    pub auth_model_id: Option<String>,
    pub navigator_settings: NavigatorSettings,
}

/// Outcome of `testConnection`. Failure is a regular result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub connected: bool,
    pub message: String,
    pub driver_id: Option<String>,
    pub elapsed_ms: u64,
}

/// Snapshot returned by `openSession` and `sessionState`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub create_time: u64,
    pub last_access_time: u64,
    pub locale: String,
    pub connections: Vec<ConnectionInfo>,
    pub active_tasks: usize,
    pub navigator_settings: NavigatorSettings,
}

/// Severity of a session log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of the per-session log read by `readSessionLog`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub time: u64,
    pub level: LogLevel,
    pub message: String,
}

//! Typed configuration values decoded from caller-supplied maps.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::decode::{coerce, Decode, DecodeError};
use crate::types::{Value, ValueMap};

/// Controls how a data source's object tree is browsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct NavigatorSettings {
    pub show_system_objects: bool,
    pub show_utility_objects: bool,
    pub show_only_entities: bool,
    pub merge_entities: bool,
    pub hide_folders: bool,
    pub hide_schemas: bool,
    pub hide_virtual_model: bool,
}

impl Decode for NavigatorSettings {
    const TARGET: &'static str = "NavigatorSettings";

    fn decode_field(&mut self, field: &str, value: &Value) -> Result<bool, DecodeError> {
        let slot = match field {
            "showSystemObjects" => &mut self.show_system_objects,
            "showUtilityObjects" => &mut self.show_utility_objects,
            "showOnlyEntities" => &mut self.show_only_entities,
            "mergeEntities" => &mut self.merge_entities,
            "hideFolders" => &mut self.hide_folders,
            "hideSchemas" => &mut self.hide_schemas,
            "hideVirtualModel" => &mut self.hide_virtual_model,
            _ => return Ok(false),
        };
        if let Some(b) = coerce::boolean(Self::TARGET, field, value)? {
            *slot = b;
        }
        Ok(true)
    }
}

/// Describes how to reach a data source.
///
/// Either `driver_id` plus endpoint parameters (or `url`), or `template_id`
/// referencing a predefined data source, is expected by backends; the
/// decoder itself does not enforce that.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    pub template: bool,
    pub read_only: bool,
    pub save_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_model_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigator_settings: Option<NavigatorSettings>,
}

impl ConnectionConfig {
    /// Display name, falling back to `host[:port]` and then the driver id.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match (&self.host, self.port) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.clone(),
            _ => self
                .driver_id
                .clone()
                .unwrap_or_else(|| "connection".to_string()),
        }
    }
}

impl Decode for ConnectionConfig {
    const TARGET: &'static str = "ConnectionConfig";

    fn decode_field(&mut self, field: &str, value: &Value) -> Result<bool, DecodeError> {
        let t = Self::TARGET;
        match field {
            "connectionId" => self.connection_id = coerce::string(t, field, value)?,
            "templateId" => self.template_id = coerce::string(t, field, value)?,
            "driverId" => self.driver_id = coerce::string(t, field, value)?,
            "name" => self.name = coerce::string(t, field, value)?,
            "description" => self.description = coerce::string(t, field, value)?,
            "folder" => self.folder = coerce::string(t, field, value)?,
            "host" => self.host = coerce::string(t, field, value)?,
            "port" => self.port = coerce::port(t, field, value)?,
            "serverName" => self.server_name = coerce::string(t, field, value)?,
            "databaseName" => self.database_name = coerce::string(t, field, value)?,
            "url" => self.url = coerce::string(t, field, value)?,
            "properties" => {
                self.properties = coerce::string_map(t, field, value)?.unwrap_or_default();
            }
            "template" => self.template = coerce::boolean(t, field, value)?.unwrap_or_default(),
            "readOnly" => self.read_only = coerce::boolean(t, field, value)?.unwrap_or_default(),
            "saveCredentials" => {
                self.save_credentials = coerce::boolean(t, field, value)?.unwrap_or_default();
            }
            "authModelId" => self.auth_model_id = coerce::string(t, field, value)?,
            "credentials" => self.credentials = coerce::map(t, field, value)?.unwrap_or_default(),
            "navigatorSettings" => self.navigator_settings = coerce::nested(t, field, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

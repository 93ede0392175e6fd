use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Server-level configuration for the dispatch runtime.
///
/// Controls server identity, session lifetime, operation timeouts and
/// concurrency limits. Every field has a default, so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// Product name reported by `serverConfig`.
    pub server_name: String,
    /// Product version reported by `serverConfig`.
    pub server_version: String,
    /// Locales a session may switch to.
    pub supported_locales: Vec<String>,
    /// Locale of new sessions whose client locale is unsupported.
    pub default_locale: String,
    /// Permissions granted to every (anonymous) session.
    pub anonymous_permissions: Vec<String>,
    /// Idle time after which a session expires, in milliseconds.
    pub session_ttl_ms: u64,
    /// Interval between expired-session sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Maximum entries kept in each session log.
    pub session_log_capacity: usize,
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "dsgate".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            supported_locales: vec!["en".to_string()],
            default_locale: "en".to_string(),
            anonymous_permissions: vec!["public".to_string()],
            session_ttl_ms: 30 * 60 * 1000,
            sweep_interval_ms: 60_000,
            session_log_capacity: 256,
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
        }
    }
}

impl ServerConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, unknown keys, or a default locale
    /// that is not among the supported ones.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_json::from_str(raw).context("failed to parse server configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails [`Self::from_json`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// # Errors
    ///
    /// Fails when the default locale is unsupported or a limit is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.supported_locales.contains(&self.default_locale) {
            anyhow::bail!(
                "default locale `{}` is not in supportedLocales",
                self.default_locale
            );
        }
        if self.max_concurrent_operations == 0 {
            anyhow::bail!("maxConcurrentOperations must be at least 1");
        }
        if self.sweep_interval_ms == 0 {
            anyhow::bail!("sweepIntervalMs must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    #[must_use]
    pub fn default_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.default_operation_timeout_ms)
    }
}

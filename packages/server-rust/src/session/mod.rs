//! Sessions: per-client server-side context, its store, and the resolver.
//!
//! A [`Session`] is owned by a [`SessionStore`](crate::traits::SessionStore);
//! the dispatcher holds an `Arc<Session>` for the duration of one call.
//! Every mutable field uses its own synchronization so concurrent calls on
//! the same session never serialize on a single lock.

pub mod memory;
pub mod resolver;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use dsgate_core::{ConnectionConfig, ConnectionId, NavigatorSettings, SessionId, TaskId};
use parking_lot::Mutex;

use crate::model::{ConnectionInfo, LogEntry, LogLevel, SessionInfo};

pub use memory::InMemorySessionStore;
pub use resolver::SessionResolver;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Failure to resolve a session from a request context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session {0} has expired")]
    Expired(SessionId),
}

// ---------------------------------------------------------------------------
// ConnectionRecord
// ---------------------------------------------------------------------------

/// A data-source connection owned by one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub config: ConnectionConfig,
    pub navigator_settings: NavigatorSettings,
    pub connected: bool,
    pub created_at: u64,
    pub connect_time: Option<u64>,
}

impl ConnectionRecord {
    #[must_use]
    pub fn new(id: ConnectionId, config: ConnectionConfig, defaults: NavigatorSettings) -> Self {
        let navigator_settings = config.navigator_settings.unwrap_or(defaults);
        Self {
            id,
            config,
            navigator_settings,
            connected: false,
            created_at: now_millis(),
            connect_time: None,
        }
    }

    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        let cfg = &self.config;
        ConnectionInfo {
            id: self.id.clone(),
            driver_id: cfg.driver_id.clone(),
            name: cfg.display_name(),
            description: cfg.description.clone(),
            folder: cfg.folder.clone(),
            host: cfg.host.clone(),
            port: cfg.port,
            database_name: cfg.database_name.clone(),
            template: cfg.template,
            template_id: cfg.template_id.clone(),
            read_only: cfg.read_only,
            connected: self.connected,
            connect_time: self.connect_time,
            auth_model_id: cfg.auth_model_id.clone(),
            navigator_settings: self.navigator_settings,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Settings applied to every newly created session.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub locale: String,
    pub permissions: Vec<String>,
    pub log_capacity: usize,
    pub navigator_settings: NavigatorSettings,
}

/// One client context, identified by a stable id.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: u64,
    /// Epoch millis; only ever moves forward.
    last_touch: AtomicU64,
    locale: ArcSwap<String>,
    navigator_defaults: ArcSwap<NavigatorSettings>,
    permissions: Vec<String>,
    connections: DashMap<ConnectionId, ConnectionRecord>,
    tasks: DashSet<TaskId>,
    log: Mutex<VecDeque<LogEntry>>,
    log_capacity: usize,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, locale: String, defaults: &SessionDefaults) -> Self {
        Self::new_at(id, locale, defaults, now_millis())
    }

    /// Creates a session whose creation and last-touch time is `now`.
    #[must_use]
    pub fn new_at(id: SessionId, locale: String, defaults: &SessionDefaults, now: u64) -> Self {
        Self {
            id,
            created_at: now,
            last_touch: AtomicU64::new(now),
            locale: ArcSwap::from_pointee(locale),
            navigator_defaults: ArcSwap::from_pointee(defaults.navigator_settings),
            permissions: defaults.permissions.clone(),
            connections: DashMap::new(),
            tasks: DashSet::new(),
            log: Mutex::new(VecDeque::with_capacity(defaults.log_capacity.min(64))),
            log_capacity: defaults.log_capacity,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    // ----- expiry clock -----

    /// Refreshes the last-touch timestamp. Never moves it backwards.
    pub fn touch_at(&self, now: u64) {
        self.last_touch.fetch_max(now, Ordering::AcqRel);
    }

    pub fn touch(&self) {
        self.touch_at(now_millis());
    }

    #[must_use]
    pub fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Acquire)
    }

    /// Whether the session has been idle for longer than `ttl_ms` at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_touch()) > ttl_ms
    }

    // ----- settings -----

    #[must_use]
    pub fn locale(&self) -> Arc<String> {
        self.locale.load_full()
    }

    pub fn set_locale(&self, locale: impl Into<String>) {
        self.locale.store(Arc::new(locale.into()));
    }

    #[must_use]
    pub fn navigator_defaults(&self) -> NavigatorSettings {
        **self.navigator_defaults.load()
    }

    pub fn set_navigator_defaults(&self, settings: NavigatorSettings) {
        self.navigator_defaults.store(Arc::new(settings));
    }

    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    // ----- connections -----

    pub fn insert_connection(&self, record: ConnectionRecord) {
        self.connections.insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn connection(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|r| r.value().clone())
    }

    /// Applies `f` to a connection under its entry lock and returns the
    /// updated record.
    pub fn update_connection<F>(&self, id: &ConnectionId, f: F) -> Option<ConnectionRecord>
    where
        F: FnOnce(&mut ConnectionRecord),
    {
        self.connections.get_mut(id).map(|mut entry| {
            f(entry.value_mut());
            entry.value().clone()
        })
    }

    pub fn remove_connection(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.remove(id).map(|(_, record)| record)
    }

    /// All connections, oldest first.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    // ----- tasks -----

    pub fn attach_task(&self, id: TaskId) {
        self.tasks.insert(id);
    }

    pub fn detach_task(&self, id: &TaskId) {
        self.tasks.remove(id);
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    // ----- log -----

    /// Appends to the bounded session log, dropping the oldest entry when full.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock();
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(LogEntry {
            time: now_millis(),
            level,
            message: message.into(),
        });
    }

    /// Returns up to `max_entries` of the newest entries, oldest first.
    /// When `clear` is set, the whole log is emptied afterwards.
    pub fn read_log(&self, max_entries: Option<usize>, clear: bool) -> Vec<LogEntry> {
        let mut log = self.log.lock();
        let take = max_entries.unwrap_or(log.len()).min(log.len());
        let entries = log.iter().skip(log.len() - take).cloned().collect();
        if clear {
            log.clear();
        }
        entries
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            create_time: self.created_at,
            last_access_time: self.last_touch(),
            locale: self.locale().as_ref().clone(),
            connections: self.connections().iter().map(ConnectionRecord::info).collect(),
            active_tasks: self.task_count(),
            navigator_settings: self.navigator_defaults(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-memory session store.
//!
//! Sessions live in a `DashMap`, so lookups and touches on different
//! sessions never contend on a shared lock.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dsgate_core::{RequestContext, SessionId};
use tracing::debug;
use uuid::Uuid;

use super::{now_millis, Session, SessionDefaults, SessionError};
use crate::traits::SessionStore;

/// Session store keeping every session in process memory.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
    ttl_ms: u64,
    defaults: SessionDefaults,
    supported_locales: Vec<String>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(ttl_ms: u64, defaults: SessionDefaults, supported_locales: Vec<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl_ms,
            defaults,
            supported_locales,
        }
    }

    /// Picks the client's locale when the server supports it.
    fn initial_locale(&self, ctx: &RequestContext) -> String {
        ctx.client_locale
            .as_deref()
            .filter(|l| self.supported_locales.iter().any(|s| s == l))
            .unwrap_or(&self.defaults.locale)
            .to_string()
    }

    /// Looks up a live session, destroying it if it has expired.
    fn lookup(&self, id: &SessionId, now: u64) -> Result<Arc<Session>, SessionError> {
        // Clone out of the guard before any removal on the same shard.
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SessionError::NotFound)?;

        if session.is_expired_at(now, self.ttl_ms) {
            let ttl = self.ttl_ms;
            self.sessions
                .remove_if(id, |_, s| s.is_expired_at(now, ttl));
            debug!(session_id = %id, "session expired");
            return Err(SessionError::Expired(id.clone()));
        }
        session.touch_at(now);
        Ok(session)
    }

    fn create(&self, ctx: &RequestContext) -> Arc<Session> {
        let id = SessionId::new(Uuid::new_v4().to_string());
        let session = Arc::new(Session::new(id.clone(), self.initial_locale(ctx), &self.defaults));
        self.sessions.insert(id.clone(), Arc::clone(&session));
        debug!(session_id = %id, trace_id = %ctx.trace_id, "session created");
        session
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(
        &self,
        ctx: &RequestContext,
        create_if_absent: bool,
    ) -> Result<Arc<Session>, SessionError> {
        let now = now_millis();
        let found = match &ctx.session_id {
            Some(id) => self.lookup(id, now),
            None => Err(SessionError::NotFound),
        };
        match found {
            Ok(session) => Ok(session),
            Err(_) if create_if_absent => Ok(self.create(ctx)),
            Err(err) => Err(err),
        }
    }

    async fn close_session(&self, ctx: &RequestContext) -> Option<Arc<Session>> {
        let id = ctx.session_id.as_ref()?;
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(session_id = %id, "session closed");
        }
        removed
    }

    async fn touch_session(&self, ctx: &RequestContext) -> Result<(), SessionError> {
        let id = ctx.session_id.as_ref().ok_or(SessionError::NotFound)?;
        self.lookup(id, now_millis()).map(|_| ())
    }

    async fn evict_expired(&self) -> Vec<SessionId> {
        let now = now_millis();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired_at(now, self.ttl_ms))
            .map(|entry| entry.key().clone())
            .collect();

        let ttl = self.ttl_ms;
        expired
            .into_iter()
            .filter(|id| {
                self.sessions
                    .remove_if(id, |_, s| s.is_expired_at(now, ttl))
                    .is_some()
            })
            .collect()
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use dsgate_core::NavigatorSettings;

    use super::*;

    fn store(ttl_ms: u64) -> InMemorySessionStore {
        InMemorySessionStore::new(
            ttl_ms,
            SessionDefaults {
                locale: "en".to_string(),
                permissions: vec!["public".to_string()],
                log_capacity: 16,
                navigator_settings: NavigatorSettings::default(),
            },
            vec!["en".to_string(), "ru".to_string()],
        )
    }

    fn ctx(id: Option<&SessionId>) -> RequestContext {
        let ctx = RequestContext::new("trace");
        match id {
            Some(id) => ctx.with_session(id.clone()),
            None => ctx,
        }
    }

    #[tokio::test]
    async fn missing_session_without_create_is_not_found() {
        let store = store(60_000);
        let err = store.get_session(&ctx(None), false).await.unwrap_err();
        assert_eq!(err, SessionError::NotFound);

        let unknown = SessionId::from("nobody");
        let err = store.get_session(&ctx(Some(&unknown)), false).await.unwrap_err();
        assert_eq!(err, SessionError::NotFound);
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn create_then_resolve_keeps_id_stable() {
        let store = store(60_000);
        let created = store.get_session(&ctx(None), true).await.unwrap();
        let id = created.id().clone();

        let again = store.get_session(&ctx(Some(&id)), false).await.unwrap();
        assert_eq!(again.id(), &id);

        // Idempotent open: an existing session is returned unchanged.
        let reopened = store.get_session(&ctx(Some(&id)), true).await.unwrap();
        assert!(Arc::ptr_eq(&created, &reopened));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn client_locale_used_only_when_supported() {
        let store = store(60_000);
        let mut c = ctx(None);
        c.client_locale = Some("ru".to_string());
        assert_eq!(store.get_session(&c, true).await.unwrap().locale().as_str(), "ru");

        c.client_locale = Some("xx".to_string());
        assert_eq!(store.get_session(&c, true).await.unwrap().locale().as_str(), "en");
    }

    #[tokio::test]
    async fn expired_session_reports_expired_then_not_found() {
        let store = store(0);
        let session = store.get_session(&ctx(None), true).await.unwrap();
        let id = session.id().clone();
        // Replace it with a copy last touched at the epoch.
        let stale = Session::new_at(id.clone(), "en".to_string(), &store.defaults, 0);
        store.sessions.insert(id.clone(), Arc::new(stale));

        let err = store.get_session(&ctx(Some(&id)), false).await.unwrap_err();
        assert_eq!(err, SessionError::Expired(id.clone()));
        let err = store.get_session(&ctx(Some(&id)), false).await.unwrap_err();
        assert_eq!(err, SessionError::NotFound);
    }

    #[tokio::test]
    async fn touch_and_close() {
        let store = store(60_000);
        let id = store.get_session(&ctx(None), true).await.unwrap().id().clone();

        store.touch_session(&ctx(Some(&id))).await.unwrap();
        assert!(store.close_session(&ctx(Some(&id))).await.is_some());
        assert_eq!(
            store.touch_session(&ctx(Some(&id))).await.unwrap_err(),
            SessionError::NotFound
        );
        assert!(store.close_session(&ctx(Some(&id))).await.is_none());
    }

    #[tokio::test]
    async fn evict_expired_removes_only_idle_sessions() {
        let store = store(1_000);
        let live = store.get_session(&ctx(None), true).await.unwrap();

        let stale_id = SessionId::from("stale");
        let stale = Session::new_at(stale_id.clone(), "en".to_string(), &store.defaults, 0);
        store.sessions.insert(stale_id.clone(), Arc::new(stale));

        let evicted = store.evict_expired().await;
        assert_eq!(evicted, vec![stale_id]);
        assert_eq!(store.count(), 1);
        assert!(store.get_session(&ctx(Some(live.id())), false).await.is_ok());
    }
}

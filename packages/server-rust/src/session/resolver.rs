//! Session resolution on behalf of the dispatcher.
//!
//! Wraps a [`SessionStore`] and keeps the task tracker consistent with it:
//! whenever a session is destroyed (closed, expired on access, or swept),
//! the tasks it owns are cancelled and removed.

use std::sync::Arc;

use dsgate_core::{RequestContext, SessionId};
use tracing::debug;

use super::{Session, SessionError};
use crate::task::TaskTracker;
use crate::traits::SessionStore;

/// Resolves request contexts to sessions.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
    tasks: Arc<TaskTracker>,
}

impl SessionResolver {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, tasks: Arc<TaskTracker>) -> Self {
        Self { store, tasks }
    }

    /// Resolves the session referenced by `ctx`.
    ///
    /// # Errors
    ///
    /// Without `create_if_absent`: `SessionError::NotFound` when no valid
    /// session is referenced, `SessionError::Expired` when it timed out.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        create_if_absent: bool,
    ) -> Result<Arc<Session>, SessionError> {
        match self.store.get_session(ctx, false).await {
            Ok(session) => Ok(session),
            Err(err) => {
                if let SessionError::Expired(id) = &err {
                    self.destroyed(id);
                }
                if create_if_absent {
                    self.store.get_session(ctx, true).await
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Refreshes the last-touch time of the referenced session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` when no live session is referenced.
    pub async fn touch(&self, ctx: &RequestContext) -> Result<(), SessionError> {
        match self.store.touch_session(ctx).await {
            Ok(()) => Ok(()),
            Err(SessionError::Expired(id)) => {
                self.destroyed(&id);
                Err(SessionError::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// Destroys the referenced session. Returns whether one existed.
    pub async fn close(&self, ctx: &RequestContext) -> bool {
        match self.store.close_session(ctx).await {
            Some(session) => {
                self.destroyed(session.id());
                true
            }
            None => false,
        }
    }

    /// Evicts expired sessions. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let evicted = self.store.evict_expired().await;
        for id in &evicted {
            self.destroyed(id);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted expired sessions");
        }
        evicted.len()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.store.count()
    }

    fn destroyed(&self, id: &SessionId) {
        let dropped = self.tasks.drop_session(id);
        if dropped > 0 {
            debug!(session_id = %id, tasks = dropped, "dropped tasks of destroyed session");
        }
    }
}

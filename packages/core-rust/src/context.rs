use crate::ids::SessionId;

/// Per-request context supplied by the transport for every call.
///
/// Carries the raw session reference (e.g., from a cookie) rather than a
/// resolved session; resolution is the session layer's job.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Session id presented by the caller, if any.
    pub session_id: Option<SessionId>,
    /// Distributed trace identifier for observability.
    pub trace_id: String,
    /// Locale requested by the client (e.g., `Accept-Language`), used when a
    /// new session is created.
    pub client_locale: Option<String>,
    /// Remote peer address, for session logs.
    pub remote_addr: Option<String>,
}

impl RequestContext {
    /// Creates an anonymous context with no session reference.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            ..Self::default()
        }
    }

    /// Returns a copy of this context bound to the given session id.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

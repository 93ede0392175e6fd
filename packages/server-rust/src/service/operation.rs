//! Operation metadata, the call envelope, responses, and the error taxonomy.

use std::fmt;

use dsgate_core::{DecodeError, RequestContext, SessionId, Value, ValueMap};
use serde::Serialize;

use crate::session::SessionError;
use crate::task::TrackerError;

// ---------------------------------------------------------------------------
// Operation metadata
// ---------------------------------------------------------------------------

/// Whether an operation only reads server state or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Query,
    Mutation,
}

impl OperationClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Query => "query",
            OperationClass::Mutation => "mutation",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the dispatcher obtains a session before invoking the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequirement {
    /// No session is resolved (server-wide reads).
    None,
    /// An existing, non-expired session is required.
    Existing,
    /// A session is created when absent (session open).
    CreateIfAbsent,
    /// The handler only receives the raw request context. Used by close and
    /// touch, which may act on an expired or about-to-be-destroyed session.
    ContextOnly,
}

/// Declared type of a named operation argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int,
    Bool,
    Map,
    /// Structured `ConnectionConfig`, run through the decoder.
    ConnectionConfig,
    /// Structured `NavigatorSettings`, run through the decoder.
    NavigatorSettings,
}

impl ArgType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Int => "integer",
            ArgType::Bool => "boolean",
            ArgType::Map => "map",
            ArgType::ConnectionConfig => "connection config",
            ArgType::NavigatorSettings => "navigator settings",
        }
    }
}

/// One entry in an operation's argument allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
}

impl ArgSpec {
    #[must_use]
    pub const fn required(name: &'static str, ty: ArgType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str, ty: ArgType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// Declared shape of a successful response value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    Boolean,
    Object,
    List,
    /// An async task descriptor whose id can be polled later.
    TaskHandle,
}

// ---------------------------------------------------------------------------
// Call envelope and response
// ---------------------------------------------------------------------------

/// One inbound call, as it travels through the middleware pipeline.
#[derive(Debug, Clone)]
pub struct OperationCall {
    pub call_id: u64,
    pub operation: String,
    /// Pins the lookup to one class; `None` resolves queries first.
    pub class: Option<OperationClass>,
    pub args: ValueMap,
    pub ctx: RequestContext,
    pub timeout_ms: u64,
}

/// Successful dispatch result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub operation: String,
    /// Session the call was bound to, so transports can set or clear cookies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Missing or mistyped operation argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("missing required argument `{name}`")]
    Missing { name: &'static str },
    #[error("argument `{name}`: expected {expected}, found {found}")]
    Type {
        name: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("argument `{name}` is not declared for this operation")]
    Undeclared { name: &'static str },
}

/// Failure reported by a backend handler: a stable code plus a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub const CANCELLED: &'static str = "cancelled";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returned by task bodies that acknowledge a cancellation request.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED, "task was cancelled")
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == Self::CANCELLED
    }
}

/// Errors raised anywhere between lookup and handler completion.
///
/// Never crosses the dispatch boundary: it is converted into a
/// [`DispatchError`] first.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error("cannot decode argument `{argument}`: {source}")]
    Decode {
        argument: &'static str,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Stable error codes of the uniform error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownOperation,
    ArgumentError,
    DecodeError,
    SessionNotFound,
    SessionExpired,
    TaskNotFound,
    HandlerError,
    Timeout,
    Overloaded,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownOperation => "unknown_operation",
            ErrorCode::ArgumentError => "argument_error",
            ErrorCode::DecodeError => "decode_error",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::TaskNotFound => "task_not_found",
            ErrorCode::HandlerError => "handler_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Overloaded => "overloaded",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The uniform error envelope returned to the calling engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{operation}: [{code}] {message}")]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
    pub operation: String,
    /// The handler's own error code, for `handler_error` envelopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_code: Option<String>,
}

impl DispatchError {
    /// Converts an internal error into the envelope for `operation`.
    #[must_use]
    pub fn from_operation(operation: &str, err: OperationError) -> Self {
        let (code, detail_code) = match &err {
            OperationError::UnknownOperation { .. } => (ErrorCode::UnknownOperation, None),
            OperationError::Argument(_) => (ErrorCode::ArgumentError, None),
            OperationError::Decode { .. } => (ErrorCode::DecodeError, None),
            OperationError::Session(SessionError::NotFound) => (ErrorCode::SessionNotFound, None),
            OperationError::Session(SessionError::Expired(_)) => (ErrorCode::SessionExpired, None),
            OperationError::Tracker(TrackerError::NotFound { .. }) => (ErrorCode::TaskNotFound, None),
            OperationError::Handler(h) => (ErrorCode::HandlerError, Some(h.code.clone())),
            OperationError::Timeout { .. } => (ErrorCode::Timeout, None),
            OperationError::Overloaded => (ErrorCode::Overloaded, None),
            OperationError::Internal(_) => (ErrorCode::Internal, None),
        };
        let message = match &err {
            OperationError::Handler(h) => h.message.clone(),
            // Internal errors keep their chain out of the envelope.
            OperationError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        Self {
            code,
            message,
            operation: operation.to_string(),
            detail_code,
        }
    }
}

//! `dsgate` Core — loosely-typed values, request context, identifiers, and
//! structural configuration decoding.

pub mod config;
pub mod context;
pub mod decode;
pub mod ids;
pub mod types;

pub use config::{ConnectionConfig, NavigatorSettings};
pub use context::RequestContext;
pub use decode::{decode, decode_value, encode, Decode, DecodeError};
pub use ids::{ConnectionId, SessionId, TaskId};
pub use types::{Value, ValueMap};

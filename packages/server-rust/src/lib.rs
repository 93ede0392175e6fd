//! dsgate server: session-scoped operation dispatch with async tasks,
//! served through a tower middleware pipeline.

pub mod backend;
pub mod model;
pub mod runtime;
pub mod service;
pub mod session;
pub mod task;
pub mod traits;

pub use backend::InMemoryBackend;
pub use runtime::{Runtime, RuntimeError};
pub use session::{InMemorySessionStore, Session, SessionError, SessionResolver};
pub use task::{TaskContext, TaskInfo, TaskStatus, TaskTracker, TrackerError};
pub use traits::{CoreBackend, SessionStore};

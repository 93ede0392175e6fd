//! Backend implementations of [`CoreBackend`](crate::traits::CoreBackend).
//!
//! - [`memory`]: in-process reference backend with a fixed driver catalog and
//!   simulated endpoints

pub mod memory;

pub use memory::InMemoryBackend;

/// Stable handler error codes raised by backends.
pub mod codes {
    pub const CONNECTION_NOT_FOUND: &str = "connection_not_found";
    pub const TEMPLATE_NOT_FOUND: &str = "template_not_found";
    pub const DRIVER_NOT_FOUND: &str = "driver_not_found";
    pub const UNSUPPORTED_LOCALE: &str = "unsupported_locale";
    pub const INVALID_CONFIGURATION: &str = "invalid_configuration";
    pub const CREDENTIALS_REQUIRED: &str = "credentials_required";
    pub const CONNECT_FAILED: &str = "connect_failed";
}

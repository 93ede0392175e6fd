//! Operation dispatch and execution framework.
//!
//! 1. **Catalog** (`catalog`): static descriptors for every core operation
//! 2. **Registry** (`registry`): name lookup per operation class
//! 3. **Dispatcher** (`dispatcher`): session resolution, argument binding, handler call
//! 4. **Middleware** (`middleware`): Tower layers (timeout, metrics, load-shedding)
//! 5. **Background workers** (`worker`): periodic session sweeping

pub mod args;
pub mod call;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod worker;

// Re-export key types for convenient access.
pub use args::{ArgValue, Args};
pub use call::CallBuilder;
pub use catalog::CORE_OPERATIONS;
pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use operation::{
    ArgSpec, ArgType, ArgumentError, DispatchError, ErrorCode, HandlerError, OperationCall,
    OperationClass, OperationError, Response, ResponseShape, SessionRequirement,
};
pub use registry::{
    HandlerEnv, HandlerFn, HandlerFuture, Invocation, OperationDescriptor, OperationRegistry,
    RegistryError,
};
pub use worker::{BackgroundRunnable, BackgroundWorker, SessionSweeper, SweepTask};

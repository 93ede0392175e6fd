use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dsgate_core::{RequestContext, Value};

use super::args::Args;
use super::operation::{
    ArgSpec, OperationClass, OperationError, ResponseShape, SessionRequirement,
};
use crate::session::{Session, SessionResolver};
use crate::task::TaskTracker;
use crate::traits::CoreBackend;

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Future returned by every catalog handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

/// Uniform handler signature: every operation is invoked through this.
pub type HandlerFn = fn(Invocation) -> HandlerFuture;

/// Collaborators shared by all handlers, injected at construction.
pub struct HandlerEnv {
    pub backend: Arc<dyn CoreBackend>,
    pub sessions: SessionResolver,
    pub tasks: Arc<TaskTracker>,
}

/// Everything one handler invocation receives.
pub struct Invocation {
    pub env: Arc<HandlerEnv>,
    /// Resolved per the descriptor's [`SessionRequirement`]; `None` for
    /// `None` and `ContextOnly` operations.
    pub session: Option<Arc<Session>>,
    pub args: Args,
    pub ctx: RequestContext,
}

impl Invocation {
    /// The resolved session.
    ///
    /// # Errors
    ///
    /// Internal error when the descriptor did not request a session.
    pub fn session(&self) -> Result<&Arc<Session>, OperationError> {
        self.session
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("operation handler requires a resolved session").into())
    }
}

// ---------------------------------------------------------------------------
// OperationDescriptor
// ---------------------------------------------------------------------------

/// Static metadata of one catalog operation.
#[derive(Clone, Copy)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub class: OperationClass,
    pub session: SessionRequirement,
    /// Ordered argument allow-list.
    pub args: &'static [ArgSpec],
    pub response: ResponseShape,
    pub handler: HandlerFn,
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("session", &self.session)
            .field("args", &self.args)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// OperationRegistry
// ---------------------------------------------------------------------------

/// Invalid catalog, detected while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {class} operation `{name}`")]
    Duplicate {
        class: OperationClass,
        name: &'static str,
    },
    #[error("operation `{operation}` declares argument `{argument}` twice")]
    DuplicateArgument {
        operation: &'static str,
        argument: &'static str,
    },
}

/// Immutable name -> descriptor table, one map per operation class.
///
/// Built once from a declarative table and never mutated afterwards, so
/// concurrent dispatches read it without synchronization.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    queries: HashMap<&'static str, OperationDescriptor>,
    mutations: HashMap<&'static str, OperationDescriptor>,
}

impl OperationRegistry {
    /// Builds and validates a registry from one or more descriptor tables.
    ///
    /// # Errors
    ///
    /// `RegistryError::Duplicate` when two descriptors share a class and
    /// name, `RegistryError::DuplicateArgument` for a repeated argument name.
    pub fn build<'a>(
        tables: impl IntoIterator<Item = &'a [OperationDescriptor]>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for descriptor in tables.into_iter().flatten() {
            for (i, arg) in descriptor.args.iter().enumerate() {
                if descriptor.args[..i].iter().any(|a| a.name == arg.name) {
                    return Err(RegistryError::DuplicateArgument {
                        operation: descriptor.name,
                        argument: arg.name,
                    });
                }
            }
            let map = match descriptor.class {
                OperationClass::Query => &mut registry.queries,
                OperationClass::Mutation => &mut registry.mutations,
            };
            if map.insert(descriptor.name, *descriptor).is_some() {
                return Err(RegistryError::Duplicate {
                    class: descriptor.class,
                    name: descriptor.name,
                });
            }
        }
        Ok(registry)
    }

    /// Looks up an operation by name, queries first.
    ///
    /// # Errors
    ///
    /// `OperationError::UnknownOperation` when no class defines `name`.
    pub fn lookup(&self, name: &str) -> Result<&OperationDescriptor, OperationError> {
        self.queries
            .get(name)
            .or_else(|| self.mutations.get(name))
            .ok_or_else(|| OperationError::UnknownOperation {
                name: name.to_string(),
            })
    }

    /// Looks up an operation within one class.
    ///
    /// # Errors
    ///
    /// `OperationError::UnknownOperation` when `class` does not define `name`.
    pub fn lookup_in(
        &self,
        class: OperationClass,
        name: &str,
    ) -> Result<&OperationDescriptor, OperationError> {
        let map = match class {
            OperationClass::Query => &self.queries,
            OperationClass::Mutation => &self.mutations,
        };
        map.get(name).ok_or_else(|| OperationError::UnknownOperation {
            name: name.to_string(),
        })
    }

    /// Total number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len() + self.mutations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(class, name)` pairs, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<(OperationClass, &'static str)> {
        let mut names: Vec<_> = self
            .queries
            .keys()
            .map(|n| (OperationClass::Query, *n))
            .chain(self.mutations.keys().map(|n| (OperationClass::Mutation, *n)))
            .collect();
        names.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()).then(a.1.cmp(b.1)));
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

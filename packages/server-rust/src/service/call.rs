//! Builds [`OperationCall`] envelopes for the dispatch pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use dsgate_core::{RequestContext, ValueMap};

use super::operation::{OperationCall, OperationClass};

/// Stamps inbound calls with a unique call id and the default timeout.
#[derive(Debug)]
pub struct CallBuilder {
    default_timeout_ms: u64,
    call_id_counter: AtomicU64,
}

impl CallBuilder {
    #[must_use]
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            default_timeout_ms,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// A call resolved by name, queries first.
    #[must_use]
    pub fn call(
        &self,
        operation: impl Into<String>,
        args: ValueMap,
        ctx: RequestContext,
    ) -> OperationCall {
        OperationCall {
            call_id: self.next_call_id(),
            operation: operation.into(),
            class: None,
            args,
            ctx,
            timeout_ms: self.default_timeout_ms,
        }
    }

    /// A call pinned to one operation class.
    #[must_use]
    pub fn call_in(
        &self,
        class: OperationClass,
        operation: impl Into<String>,
        args: ValueMap,
        ctx: RequestContext,
    ) -> OperationCall {
        OperationCall {
            class: Some(class),
            ..self.call(operation, args, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_are_unique_and_increasing() {
        let builder = CallBuilder::new(500);
        let a = builder.call("serverConfig", ValueMap::new(), RequestContext::new("t"));
        let b = builder.call_in(
            OperationClass::Mutation,
            "openSession",
            ValueMap::new(),
            RequestContext::new("t"),
        );
        assert!(b.call_id > a.call_id);
        assert_eq!(a.timeout_ms, 500);
        assert_eq!(a.class, None);
        assert_eq!(b.class, Some(OperationClass::Mutation));
    }
}

//! Operation handler capability and the result sink contract.
//!
//! Handlers are pluggable behaviors dispatched by `(address, name)`. The
//! engine branches on the capability tag to decide what happens to the
//! model after execution; the handler itself only sees its submodel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use castellan_value::Value;

use crate::context::OperationContext;
use crate::error::OperationFailed;

/// Capability tag deciding pre/post treatment of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Reads a cloned submodel; the tree is never touched.
    Query,
    /// Mutates the submodel; written back on success.
    Update,
    /// Creates the addressed node; the address must not exist yet.
    Add,
    /// Deletes the addressed node on success.
    Remove,
}

impl OperationKind {
    /// True for kinds whose success mutates the live tree.
    pub fn mutates(self) -> bool {
        !matches!(self, OperationKind::Query)
    }
}

/// Receiver for an in-flight operation's output.
///
/// A handler emits zero or more fragments, then exactly one terminal
/// signal. Emitting a second terminal is a programmer error; sinks may
/// ignore or surface it but the engine does not require detection.
pub trait ResultSink: Send + Sync {
    /// Streams a partial result rooted at `location` within the final
    /// `result` value.
    fn fragment(&self, location: &[String], value: Value);

    /// Terminal: the operation succeeded.
    fn complete(&self);

    /// Terminal: the operation failed with a description.
    fn failed(&self, description: Value);

    /// Terminal: cancellation won the race.
    fn cancelled(&self);
}

/// Location constant for fragments addressing the whole result.
pub const EMPTY_LOCATION: &[String] = &[];

/// Cloneable cancellation handle. `cancel` must be idempotent and
/// non-blocking; it reports whether the request was delivered to a
/// still-running operation.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl CancelHandle {
    pub fn new(f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        CancelHandle { inner: Arc::new(f) }
    }

    /// A handle for operations that cannot be cancelled.
    pub fn uncancellable() -> Self {
        CancelHandle::new(|| false)
    }

    /// A handle that trips `flag` once; later calls report `false`.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        CancelHandle::new(move || !flag.swap(true, Ordering::SeqCst))
    }

    pub fn cancel(&self) -> bool {
        (self.inner)()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// What a handler hands back synchronously: the operation that would
/// undo this one (when there is one) and a cancellation handle.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub compensating: Option<Value>,
    pub cancel: CancelHandle,
}

impl OperationResult {
    /// A result with no compensating operation and no cancellation.
    pub fn empty() -> Self {
        OperationResult {
            compensating: None,
            cancel: CancelHandle::uncancellable(),
        }
    }

    pub fn with_compensating(compensating: Value) -> Self {
        OperationResult {
            compensating: Some(compensating),
            cancel: CancelHandle::uncancellable(),
        }
    }
}

/// A pluggable operation behavior.
///
/// `execute` runs on the dispatching thread; a handler that needs to be
/// asynchronous spawns its own work and completes the sink later,
/// returning a [`CancelHandle`] that reaches that work.
pub trait OperationHandler: Send + Sync {
    fn kind(&self) -> OperationKind;

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_trips_once() {
        let flag = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle::from_flag(Arc::clone(&flag));
        assert!(handle.cancel());
        assert!(flag.load(Ordering::SeqCst));
        assert!(!handle.cancel());
        assert!(!handle.clone().cancel());
    }

    #[test]
    fn test_uncancellable_reports_false() {
        assert!(!CancelHandle::uncancellable().cancel());
    }
}

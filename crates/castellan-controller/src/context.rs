//! The execution context handed to operation handlers.

use std::sync::Arc;

use parking_lot::Mutex;

use castellan_value::Value;

use crate::error::OperationFailed;
use crate::registry::NodeRegistration;

/// Deferred side effect registered by a handler, executed after the
/// model phase completes (and skipped when a rolled-back composite
/// discards the model changes).
pub type RuntimeTask = Box<dyn FnOnce() + Send>;

/// Binds a handler invocation to its submodel view, the registration
/// trie, and the runtime-task port.
///
/// The submodel is what the handler is allowed to see and mutate; the
/// engine decides what happens to it afterwards based on the handler's
/// capability tag.
pub struct OperationContext {
    sub_model: Mutex<Option<Value>>,
    registry: Arc<NodeRegistration>,
    runtime_tasks: Arc<Mutex<Vec<RuntimeTask>>>,
}

impl OperationContext {
    pub fn new(
        sub_model: Option<Value>,
        registry: Arc<NodeRegistration>,
        runtime_tasks: Arc<Mutex<Vec<RuntimeTask>>>,
    ) -> Self {
        OperationContext {
            sub_model: Mutex::new(sub_model),
            registry,
            runtime_tasks,
        }
    }

    /// A clone of the current submodel, if this operation kind has one.
    pub fn sub_model(&self) -> Option<Value> {
        self.sub_model.lock().clone()
    }

    /// Runs `f` against the submodel in place. Fails for kinds without a
    /// submodel (remove).
    pub fn with_sub_model<R>(
        &self,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, OperationFailed> {
        let mut guard = self.sub_model.lock();
        match guard.as_mut() {
            Some(model) => Ok(f(model)),
            None => Err(OperationFailed::msg(
                "this operation has no submodel to operate on",
            )),
        }
    }

    /// Replaces the submodel wholesale.
    pub fn set_sub_model(&self, value: Value) {
        *self.sub_model.lock() = Some(value);
    }

    /// Snapshot used by the engine for write-back.
    pub(crate) fn take_sub_model(&self) -> Option<Value> {
        self.sub_model.lock().take()
    }

    pub fn registry(&self) -> &Arc<NodeRegistration> {
        &self.registry
    }

    /// Defers a side effect to after the model phase.
    pub fn register_runtime_task(&self, task: RuntimeTask) {
        self.runtime_tasks.lock().push(task);
    }
}

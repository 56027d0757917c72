//! The model controller core.
//!
//! Routes an operation to a proxy, the composite engine, or a local
//! handler; builds the operation context with the right submodel view;
//! writes successful mutations back into the live tree and triggers
//! persistence. Failures become `failed` envelopes; they never tear the
//! controller down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use castellan_value::Value;

use crate::address::PathAddress;
use crate::composite::MultiStepController;
use crate::context::{OperationContext, RuntimeTask};
use crate::error::{failure_description, ControllerError};
use crate::handler::{OperationKind, OperationResult, ResultSink};
use crate::keys;
use crate::model;
use crate::persist::ConfigurationPersister;
use crate::registry::{no_description, DescriptionProvider, NodeRegistration};

/// Entry point for executing management operations.
pub trait ModelController: Send + Sync {
    /// Asynchronous form: the sink receives fragments and exactly one
    /// terminal signal; the returned result carries the compensating
    /// operation and a cancellation handle.
    fn execute_async(&self, operation: Value, sink: Arc<dyn ResultSink>) -> OperationResult;

    /// Blocking form: drives the asynchronous form and assembles the
    /// result envelope.
    fn execute(&self, operation: Value) -> Value {
        let sink = Arc::new(SyncSink::new());
        let result = self.execute_async(operation, Arc::<SyncSink>::clone(&sink));
        sink.wait(result.compensating)
    }
}

/// The basic in-process controller over a single model tree.
pub struct BasicController {
    model: Arc<Mutex<Value>>,
    registry: Arc<NodeRegistration>,
    persister: Arc<dyn ConfigurationPersister>,
}

impl BasicController {
    pub fn new(persister: Arc<dyn ConfigurationPersister>) -> Self {
        Self::with_model(Value::empty_object(), persister, no_description())
    }

    pub fn with_model(
        model: Value,
        persister: Arc<dyn ConfigurationPersister>,
        root_description: Arc<dyn DescriptionProvider>,
    ) -> Self {
        BasicController {
            model: Arc::new(Mutex::new(model)),
            registry: NodeRegistration::root(root_description),
            persister,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistration> {
        &self.registry
    }

    /// A deep clone of the current model tree.
    pub fn model_snapshot(&self) -> Value {
        self.model.lock().clone()
    }

    /// Registers handlers that need controller internals not exposed
    /// through the operation context: the XML export of the current
    /// configuration and the whole-model write used at boot replay.
    pub fn register_internal_operations(&self) -> Result<(), crate::error::RegistryError> {
        self.registry.register_operation_handler(
            keys::READ_CONFIG_AS_XML,
            Arc::new(internal::XmlMarshallingHandler {
                model: Arc::clone(&self.model),
                persister: Arc::clone(&self.persister),
            }),
            no_description(),
            false,
        )?;
        self.registry.register_operation_handler(
            keys::WRITE_MODEL,
            Arc::new(internal::WriteModelHandler),
            no_description(),
            false,
        )
    }

    /// Executes an operation against the given model/persister pair.
    /// The public entry points call this with the live tree; the
    /// composite engine calls it with its cloned working model and a
    /// recording persister.
    pub(crate) fn execute_with(
        &self,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
        model: &Arc<Mutex<Value>>,
        persister: &Arc<dyn ConfigurationPersister>,
        tasks: &Arc<Mutex<Vec<RuntimeTask>>>,
    ) -> OperationResult {
        match self.dispatch(operation, &sink, model, persister, tasks) {
            Ok(result) => result,
            Err(description) => {
                error!(
                    operation = %operation.find(keys::OP).unwrap_or(&castellan_value::Value::Undefined),
                    address = %operation.find(keys::OP_ADDR).unwrap_or(&castellan_value::Value::Undefined),
                    "operation failed: {description}"
                );
                sink.failed(description);
                OperationResult::empty()
            }
        }
    }

    fn dispatch(
        &self,
        operation: &Value,
        sink: &Arc<dyn ResultSink>,
        model: &Arc<Mutex<Value>>,
        persister: &Arc<dyn ConfigurationPersister>,
        tasks: &Arc<Mutex<Vec<RuntimeTask>>>,
    ) -> Result<OperationResult, Value> {
        let address = PathAddress::from_value(
            operation.find(keys::OP_ADDR).unwrap_or(&Value::Undefined),
        )
        .map_err(|e| failure_description(&e))?;

        // a proxy owning the address absorbs the operation wholesale
        if let Some(proxy) = self.registry.proxy_controller(&address) {
            let mut forwarded = operation.clone();
            let rebased = address.sub_address(proxy.proxy_address().size());
            forwarded
                .insert(keys::OP_ADDR, rebased.to_value())
                .map_err(|e| failure_description(&e))?;
            debug!(address = %address, rebased = %rebased, "forwarding to proxy controller");
            return Ok(proxy.execute(forwarded, Arc::clone(sink)));
        }

        let name = operation
            .require(keys::OP)
            .and_then(|v| v.as_str().map(str::to_string))
            .map_err(|_| {
                failure_description(&ControllerError::InvalidOperationFormat(
                    "operation name is missing".to_string(),
                ))
            })?;

        if address.is_empty() && name == keys::COMPOSITE {
            let engine = MultiStepController::new(operation, Arc::clone(sink), model, persister)
                .map_err(|e| failure_description(&e))?;
            return Ok(engine.execute(self));
        }

        let handler = self
            .registry
            .operation_handler(&address, &name)
            .ok_or_else(|| {
                failure_description(&ControllerError::NoSuchHandler {
                    name: name.clone(),
                    address: address.to_string(),
                })
            })?;

        let sub_model = self
            .operation_sub_model(model, handler.kind(), &address)
            .map_err(|e| failure_description(&e))?;
        let context =
            OperationContext::new(sub_model, Arc::clone(&self.registry), Arc::clone(tasks));
        let watchful = Arc::new(WatchfulSink {
            inner: Arc::clone(sink),
            bad: AtomicBool::new(false),
        });

        let handler_sink: Arc<dyn ResultSink> = Arc::clone(&watchful) as Arc<dyn ResultSink>;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.execute(&context, operation, Arc::clone(&handler_sink))
        }));
        let result = match outcome {
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                let mut description = Value::empty_list();
                let _ = description.push(format!("handler raised unexpectedly: {message}"));
                return Err(description);
            }
            Ok(Err(failed)) => return Err(failed.description),
            Ok(Ok(result)) => result,
        };

        if handler.kind().mutates() && !watchful.bad.load(Ordering::SeqCst) {
            let mut guard = model.lock();
            match handler.kind() {
                OperationKind::Remove => {
                    model::remove(&mut guard, &address).map_err(|e| failure_description(&e))?;
                }
                _ => {
                    let node = model::navigate_mut(&mut guard, &address, true)
                        .map_err(|e| failure_description(&e))?;
                    *node = context.take_sub_model().unwrap_or_default();
                }
            }
            if let Err(e) = persister.store(&guard) {
                warn!("failed to persist configuration change: {e}");
            }
        }

        Ok(result)
    }

    fn operation_sub_model(
        &self,
        model: &Arc<Mutex<Value>>,
        kind: OperationKind,
        address: &PathAddress,
    ) -> Result<Option<Value>, ControllerError> {
        match kind {
            OperationKind::Add => {
                self.validate_new_address(model, address)?;
                Ok(Some(Value::Undefined))
            }
            OperationKind::Query | OperationKind::Update => {
                let guard = model.lock();
                model::read_cloned(&guard, address).map(Some)
            }
            OperationKind::Remove => Ok(None),
        }
    }

    /// Adding a resource requires that no resource exists at the address
    /// and every ancestor does.
    fn validate_new_address(
        &self,
        model: &Arc<Mutex<Value>>,
        address: &PathAddress,
    ) -> Result<(), ControllerError> {
        if address.is_empty() {
            return Err(ControllerError::AddressConflict(
                "the root resource always exists".to_string(),
            ));
        }
        let Some(last) = address.last_element() else {
            return Ok(());
        };
        let guard = model.lock();
        let parent_address = address.sub_address_range(0, address.size() - 1);
        for depth in 0..parent_address.size() {
            let ancestor = address.sub_address_range(0, depth + 1);
            if model::find(&guard, &ancestor).is_none() {
                return Err(ControllerError::AddressConflict(format!(
                    "cannot add resource at {address}: ancestor {ancestor} does not exist"
                )));
            }
        }
        let parent = model::find(&guard, &parent_address).unwrap_or(&Value::Undefined);
        if !parent.has(last.key()) {
            return Err(ControllerError::AddressConflict(format!(
                "cannot add resource at {address}: parent has no child type {}",
                last.key()
            )));
        }
        if parent
            .find(last.key())
            .map(|t| t.has(last.value()))
            .unwrap_or(false)
        {
            return Err(ControllerError::AddressConflict(format!(
                "resource at {address} already exists"
            )));
        }
        Ok(())
    }
}

impl ModelController for BasicController {
    fn execute_async(&self, operation: Value, sink: Arc<dyn ResultSink>) -> OperationResult {
        let tasks: Arc<Mutex<Vec<RuntimeTask>>> = Arc::new(Mutex::new(Vec::new()));
        let result =
            self.execute_with(&operation, sink, &self.model, &self.persister, &tasks);
        // model phase done; run side effects the handler deferred
        let deferred: Vec<RuntimeTask> = std::mem::take(&mut *tasks.lock());
        for task in deferred {
            task();
        }
        result
    }
}

/// Sink that forwards everything and remembers whether the operation
/// went bad, so the engine can skip the write-back.
struct WatchfulSink {
    inner: Arc<dyn ResultSink>,
    bad: AtomicBool,
}

impl ResultSink for WatchfulSink {
    fn fragment(&self, location: &[String], value: Value) {
        self.inner.fragment(location, value);
    }

    fn complete(&self) {
        self.inner.complete();
    }

    fn failed(&self, description: Value) {
        self.bad.store(true, Ordering::SeqCst);
        self.inner.failed(description);
    }

    fn cancelled(&self) {
        self.bad.store(true, Ordering::SeqCst);
        self.inner.cancelled();
    }
}

const STATUS_PENDING: u8 = 0;
const STATUS_COMPLETE: u8 = 1;
const STATUS_CANCELLED: u8 = 2;
const STATUS_FAILED: u8 = 3;

/// Sink used by the blocking entry point: accumulates fragments into the
/// envelope's `result` and parks the caller until a terminal arrives.
pub(crate) struct SyncSink {
    envelope: Mutex<Value>,
    status: AtomicU8,
    done: Condvar,
}

impl SyncSink {
    pub(crate) fn new() -> Self {
        let mut envelope = Value::empty_object();
        // make "outcome" the first key and ensure "result" exists even
        // when no fragments arrive
        let _ = envelope.get_mut(keys::OUTCOME);
        let _ = envelope.get_mut(keys::RESULT);
        SyncSink {
            envelope: Mutex::new(envelope),
            status: AtomicU8::new(STATUS_PENDING),
            done: Condvar::new(),
        }
    }

    /// Blocks until a terminal signal, then returns the envelope.
    pub(crate) fn wait(&self, compensating: Option<Value>) -> Value {
        let mut guard = self.envelope.lock();
        loop {
            match self.status.load(Ordering::SeqCst) {
                STATUS_PENDING => self.done.wait(&mut guard),
                STATUS_COMPLETE => {
                    let _ = guard.insert(keys::OUTCOME, keys::SUCCESS);
                    if let Some(comp) = compensating {
                        let _ = guard.insert(keys::COMPENSATING_OPERATION, comp);
                    }
                    return guard.clone();
                }
                STATUS_CANCELLED => {
                    guard.remove(keys::RESULT);
                    let _ = guard.insert(keys::OUTCOME, keys::CANCELLED);
                    return guard.clone();
                }
                _ => {
                    if !guard.has(keys::RESULT) {
                        guard.remove(keys::RESULT);
                    }
                    let _ = guard.insert(keys::OUTCOME, keys::FAILED);
                    return guard.clone();
                }
            }
        }
    }
}

impl ResultSink for SyncSink {
    fn fragment(&self, location: &[String], value: Value) {
        if self.status.load(Ordering::SeqCst) != STATUS_PENDING {
            return;
        }
        let mut guard = self.envelope.lock();
        if let Ok(result) = guard.get_mut(keys::RESULT) {
            if let Ok(slot) = result.get_path_mut(location) {
                *slot = value;
            }
        }
    }

    fn complete(&self) {
        let guard = self.envelope.lock();
        let _ = self
            .status
            .compare_exchange(STATUS_PENDING, STATUS_COMPLETE, Ordering::SeqCst, Ordering::SeqCst);
        drop(guard);
        self.done.notify_all();
    }

    fn failed(&self, description: Value) {
        let mut guard = self.envelope.lock();
        if self
            .status
            .compare_exchange(STATUS_PENDING, STATUS_FAILED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = guard.insert(keys::FAILURE_DESCRIPTION, description);
        }
        drop(guard);
        self.done.notify_all();
    }

    fn cancelled(&self) {
        let guard = self.envelope.lock();
        let _ = self
            .status
            .compare_exchange(STATUS_PENDING, STATUS_CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
        drop(guard);
        self.done.notify_all();
    }
}

mod internal {
    //! Handlers needing controller internals that the operation context
    //! deliberately does not expose.

    use super::*;
    use crate::error::OperationFailed;
    use crate::handler::{OperationHandler, EMPTY_LOCATION};

    pub(super) struct XmlMarshallingHandler {
        pub(super) model: Arc<Mutex<Value>>,
        pub(super) persister: Arc<dyn ConfigurationPersister>,
    }

    impl OperationHandler for XmlMarshallingHandler {
        fn kind(&self) -> OperationKind {
            OperationKind::Query
        }

        fn execute(
            &self,
            _context: &OperationContext,
            _operation: &Value,
            sink: Arc<dyn ResultSink>,
        ) -> Result<OperationResult, OperationFailed> {
            let snapshot = self.model.lock().clone();
            let mut out = Vec::new();
            self.persister
                .marshal_as_xml(&snapshot, &mut out)
                .map_err(|e| OperationFailed::msg(e.to_string()))?;
            let text =
                String::from_utf8(out).map_err(|e| OperationFailed::msg(e.to_string()))?;
            sink.fragment(EMPTY_LOCATION, Value::from(text));
            sink.complete();
            Ok(OperationResult::empty())
        }
    }

    /// Replaces the entire model; used when replaying the persisted
    /// configuration at boot.
    pub(super) struct WriteModelHandler;

    impl OperationHandler for WriteModelHandler {
        fn kind(&self) -> OperationKind {
            OperationKind::Update
        }

        fn execute(
            &self,
            context: &OperationContext,
            operation: &Value,
            sink: Arc<dyn ResultSink>,
        ) -> Result<OperationResult, OperationFailed> {
            let new_model = operation.require(keys::MODEL)?.clone();
            let previous = context.sub_model().unwrap_or_default();
            context.set_sub_model(new_model);
            let mut compensating =
                crate::address::operation(keys::WRITE_MODEL, &PathAddress::root());
            compensating.insert(keys::MODEL, previous)?;
            sink.complete();
            Ok(OperationResult::with_compensating(compensating))
        }
    }
}

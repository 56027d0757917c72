//! Controller-level scenarios: single operations, composites with and
//! without rollback, add validation, proxy forwarding, cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use castellan_controller::address::operation as make_operation;
use castellan_controller::keys;
use castellan_controller::ops::register_global_operations;
use castellan_controller::registry::no_description;
use castellan_controller::{
    BasicController, CancelHandle, ModelController, NullPersister, OperationContext,
    OperationFailed, OperationHandler, OperationKind, OperationResult, PathAddress, PathElement,
    ProxyController, ResultSink,
};
use castellan_value::Value;

fn create_test_model() -> Value {
    let mut model = Value::empty_object();
    model.insert("attr1", 1).unwrap();
    model.insert("attr2", 2).unwrap();
    model
}

/// `{operation: <name>, address: [], name: <attr>, value: <new>}`
fn get_operation(name: &str, attr: &str, new_value: i32) -> Value {
    let mut op = make_operation(name, &PathAddress::root());
    op.insert(keys::NAME, attr).unwrap();
    op.insert(keys::VALUE, new_value).unwrap();
    op
}

fn get_composite(rollback: Option<bool>, steps: &[Value]) -> Value {
    let mut op = make_operation(keys::COMPOSITE, &PathAddress::root());
    let mut list = Value::empty_list();
    for step in steps {
        list.push(step.clone()).unwrap();
    }
    op.insert(keys::STEPS, list).unwrap();
    if let Some(rollback) = rollback {
        op.insert(keys::ROLLBACK_ON_RUNTIME_FAILURE, rollback).unwrap();
    }
    op
}

/// Swaps an attribute value, returning the previous value as the result
/// and a compensating operation restoring it.
struct GoodHandler;

impl OperationHandler for GoodHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let attr = operation.require(keys::NAME)?.as_str()?.to_string();
        let new_value = operation.require(keys::VALUE)?.clone();
        let previous = context.with_sub_model(|model| -> Result<Value, OperationFailed> {
            let slot = model.get_mut(&attr)?;
            let previous = slot.clone();
            *slot = new_value;
            Ok(previous)
        })??;
        let mut compensating = get_operation("good", &attr, 0);
        compensating.insert(keys::VALUE, previous.clone()).unwrap();
        sink.fragment(&[], previous);
        sink.complete();
        Ok(OperationResult::with_compensating(compensating))
    }
}

/// Mutates the submodel, then reports failure.
struct BadHandler;

impl OperationHandler for BadHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        _sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let attr = operation.require(keys::NAME)?.as_str()?.to_string();
        context.with_sub_model(|model| {
            let _ = model.insert(&attr, "garbage");
        })?;
        Err(OperationFailed::msg("this request is bad"))
    }
}

/// Panics instead of failing cleanly.
struct EvilHandler;

impl OperationHandler for EvilHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        _context: &OperationContext,
        _operation: &Value,
        _sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        panic!("this handler is evil");
    }
}

/// Reports failure through the sink instead of the return value.
struct HandleFailedHandler;

impl OperationHandler for HandleFailedHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        _context: &OperationContext,
        _operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        sink.failed(Value::from("handleFailed"));
        Ok(OperationResult::empty())
    }
}

fn test_controller() -> BasicController {
    let controller = BasicController::with_model(
        create_test_model(),
        Arc::new(NullPersister),
        no_description(),
    );
    let registry = controller.registry();
    registry
        .register_operation_handler("good", Arc::new(GoodHandler), no_description(), true)
        .unwrap();
    registry
        .register_operation_handler("bad", Arc::new(BadHandler), no_description(), true)
        .unwrap();
    registry
        .register_operation_handler("evil", Arc::new(EvilHandler), no_description(), true)
        .unwrap();
    registry
        .register_operation_handler(
            "handle-failed",
            Arc::new(HandleFailedHandler),
            no_description(),
            true,
        )
        .unwrap();
    register_global_operations(registry).unwrap();
    controller
}

fn read_attr(controller: &BasicController, attr: &str) -> i32 {
    let result = controller.execute(get_operation("good", attr, 3));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    // "good" swaps and returns the previous value; put it back
    let previous = result.require(keys::RESULT).unwrap().as_int().unwrap();
    let restore = controller.execute(get_operation("good", attr, previous));
    assert_eq!(restore.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    previous
}

#[test]
fn test_good_single_execution() {
    let controller = test_controller();
    let result = controller.execute(get_operation("good", "attr1", 5));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    assert_eq!(result.require(keys::RESULT).unwrap().as_int().unwrap(), 1);
    let compensating = result.require(keys::COMPENSATING_OPERATION).unwrap();
    assert_eq!(compensating.require(keys::OP).unwrap().as_str().unwrap(), "good");
    assert_eq!(compensating.require(keys::VALUE).unwrap().as_int().unwrap(), 1);
    assert_eq!(read_attr(&controller, "attr1"), 5);
}

#[test]
fn test_bad_single_execution_leaves_model_unchanged() {
    let controller = test_controller();
    let result = controller.execute(get_operation("bad", "attr1", 5));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("this request is bad"));
    assert_eq!(read_attr(&controller, "attr1"), 1);
}

#[test]
fn test_evil_single_execution_is_contained() {
    let controller = test_controller();
    let result = controller.execute(get_operation("evil", "attr1", 5));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("this handler is evil"));
    assert_eq!(read_attr(&controller, "attr1"), 1);
    // the controller survives and keeps serving
    let ok = controller.execute(get_operation("good", "attr2", 7));
    assert_eq!(ok.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
}

#[test]
fn test_no_such_handler() {
    let controller = test_controller();
    let result = controller.execute(get_operation("nonexistent", "attr1", 5));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("no handler"));
}

#[test]
fn test_missing_operation_name() {
    let controller = test_controller();
    let mut op = Value::empty_object();
    op.insert(keys::OP_ADDR, Value::empty_list()).unwrap();
    let result = controller.execute(op);
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
}

#[test]
fn test_good_composite_execution() {
    let controller = test_controller();
    let step1 = get_operation("good", "attr1", 2);
    let step2 = get_operation("good", "attr2", 1);
    let result = controller.execute(get_composite(None, &[step1, step2]));

    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    let steps = result.require(keys::RESULT).unwrap();
    assert_eq!(steps.keys(), vec!["step-1", "step-2"]);
    assert_eq!(
        steps.require("step-1").unwrap().require(keys::OUTCOME).unwrap().as_str().unwrap(),
        "success"
    );
    assert_eq!(
        steps.require("step-1").unwrap().require(keys::RESULT).unwrap().as_int().unwrap(),
        1
    );
    assert_eq!(
        steps.require("step-2").unwrap().require(keys::RESULT).unwrap().as_int().unwrap(),
        2
    );

    let compensating = result.require(keys::COMPENSATING_OPERATION).unwrap();
    assert_eq!(
        compensating.require(keys::OP).unwrap().as_str().unwrap(),
        keys::COMPOSITE
    );
    let comp_steps = compensating.require(keys::STEPS).unwrap().as_list().unwrap();
    assert_eq!(comp_steps.len(), 2);
    // reverse order: the first undo step restores attr2
    assert_eq!(comp_steps[0].require(keys::NAME).unwrap().as_str().unwrap(), "attr2");
    assert_eq!(comp_steps[1].require(keys::NAME).unwrap().as_str().unwrap(), "attr1");
    assert!(!compensating
        .require(keys::ROLLBACK_ON_RUNTIME_FAILURE)
        .unwrap()
        .as_bool()
        .unwrap());

    assert_eq!(read_attr(&controller, "attr1"), 2);
    assert_eq!(read_attr(&controller, "attr2"), 1);

    // running the compensating composite restores the original model
    let undone = controller.execute(compensating.clone());
    assert_eq!(undone.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    assert_eq!(read_attr(&controller, "attr1"), 1);
    assert_eq!(read_attr(&controller, "attr2"), 2);
}

#[test]
fn test_failed_composite_rolls_back() {
    let controller = test_controller();
    let step1 = get_operation("good", "attr1", 2);
    let step2 = get_operation("bad", "attr2", 1);
    let result = controller.execute(get_composite(None, &[step1, step2]));

    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("this request is bad"));

    let steps = result.require(keys::RESULT).unwrap();
    for key in ["step-1", "step-2"] {
        let step = steps.require(key).unwrap();
        assert!(step.require(keys::ROLLED_BACK).unwrap().as_bool().unwrap());
    }

    assert_eq!(read_attr(&controller, "attr1"), 1);
    assert_eq!(read_attr(&controller, "attr2"), 2);
}

#[test]
fn test_failed_composite_without_rollback_keeps_progress() {
    let controller = test_controller();
    let step1 = get_operation("good", "attr1", 2);
    let step2 = get_operation("bad", "attr2", 1);
    let result = controller.execute(get_composite(Some(false), &[step1, step2]));

    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    // the first step's change survives
    assert_eq!(read_attr(&controller, "attr1"), 2);
    assert_eq!(read_attr(&controller, "attr2"), 2);

    let steps = result.require(keys::RESULT).unwrap();
    assert!(!steps.require("step-1").unwrap().has(keys::ROLLED_BACK));
}

#[test]
fn test_panicking_composite_step_rolls_back() {
    let controller = test_controller();
    let step1 = get_operation("good", "attr1", 2);
    let step2 = get_operation("evil", "attr2", 1);
    let result = controller.execute(get_composite(None, &[step1, step2]));

    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("this handler is evil"));
    assert_eq!(read_attr(&controller, "attr1"), 1);
    assert_eq!(read_attr(&controller, "attr2"), 2);
}

#[test]
fn test_sink_reported_failure_rolls_back() {
    let controller = test_controller();
    let step1 = get_operation("good", "attr1", 2);
    let step2 = get_operation("handle-failed", "attr2", 1);
    let result = controller.execute(get_composite(None, &[step1, step2]));

    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("handleFailed"));
    assert_eq!(read_attr(&controller, "attr1"), 1);
}

#[test]
fn test_later_steps_cancelled_after_failure() {
    let controller = test_controller();
    let step1 = get_operation("bad", "attr1", 2);
    let step2 = get_operation("good", "attr2", 1);
    let result = controller.execute(get_composite(None, &[step1, step2]));

    let steps = result.require(keys::RESULT).unwrap();
    assert_eq!(
        steps.require("step-2").unwrap().require(keys::OUTCOME).unwrap().as_str().unwrap(),
        "cancelled"
    );
    assert_eq!(read_attr(&controller, "attr2"), 2);
}

// --------------------------------------------------------------- add/remove

struct AddHandler;

impl OperationHandler for AddHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Add
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let mut node = Value::empty_object();
        if let Some(config) = operation.find("config") {
            node.insert("config", config.clone())?;
        }
        context.set_sub_model(node);
        let address = PathAddress::from_value(operation.require(keys::OP_ADDR)?)
            .map_err(|e| OperationFailed::msg(e.to_string()))?;
        let compensating = make_operation("remove", &address);
        sink.complete();
        Ok(OperationResult::with_compensating(compensating))
    }
}

struct RemoveHandler;

impl OperationHandler for RemoveHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Remove
    }

    fn execute(
        &self,
        _context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let address = PathAddress::from_value(operation.require(keys::OP_ADDR)?)
            .map_err(|e| OperationFailed::msg(e.to_string()))?;
        let compensating = make_operation(keys::ADD, &address);
        sink.complete();
        Ok(OperationResult::with_compensating(compensating))
    }
}

fn subsystem_controller() -> BasicController {
    let mut model = Value::empty_object();
    // parent declares the child type, with one existing instance
    model
        .get_mut("subsystem")
        .unwrap()
        .get_mut("web")
        .unwrap()
        .insert("port", 80)
        .unwrap();
    let controller =
        BasicController::with_model(model, Arc::new(NullPersister), no_description());
    controller
        .registry()
        .register_operation_handler(keys::ADD, Arc::new(AddHandler), no_description(), true)
        .unwrap();
    controller
        .registry()
        .register_operation_handler("remove", Arc::new(RemoveHandler), no_description(), true)
        .unwrap();
    register_global_operations(controller.registry()).unwrap();
    controller
}

fn address_op(name: &str, pairs: &[(&str, &str)]) -> Value {
    let address = PathAddress::new(
        pairs
            .iter()
            .map(|(k, v)| PathElement::new(*k, *v))
            .collect(),
    );
    make_operation(name, &address)
}

#[test]
fn test_add_new_resource() {
    let controller = subsystem_controller();
    let result = controller.execute(address_op(keys::ADD, &[("subsystem", "messaging")]));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");

    let read = controller.execute(address_op(keys::READ_RESOURCE, &[("subsystem", "messaging")]));
    assert_eq!(read.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
}

#[test]
fn test_add_existing_resource_conflicts() {
    let controller = subsystem_controller();
    let result = controller.execute(address_op(keys::ADD, &[("subsystem", "web")]));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("already exists"));
}

#[test]
fn test_add_with_missing_ancestor_conflicts() {
    let controller = subsystem_controller();
    let result = controller.execute(address_op(
        keys::ADD,
        &[("subsystem", "messaging"), ("queue", "orders")],
    ));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(result
        .require(keys::FAILURE_DESCRIPTION)
        .unwrap()
        .to_json_string(false)
        .contains("does not exist"));
}

#[test]
fn test_remove_resource() {
    let controller = subsystem_controller();
    let result = controller.execute(address_op("remove", &[("subsystem", "web")]));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");

    let read = controller.execute(address_op(keys::READ_RESOURCE, &[("subsystem", "web")]));
    assert_eq!(read.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
}

// ------------------------------------------------------------------- proxy

struct RecordingProxy {
    anchor: PathAddress,
    received: Mutex<Option<Value>>,
}

impl ProxyController for RecordingProxy {
    fn proxy_address(&self) -> &PathAddress {
        &self.anchor
    }

    fn execute(&self, operation: Value, sink: Arc<dyn ResultSink>) -> OperationResult {
        *self.received.lock() = Some(operation);
        sink.fragment(&[], Value::from("proxied"));
        sink.complete();
        OperationResult::empty()
    }
}

#[test]
fn test_proxy_receives_rebased_address() {
    let controller = test_controller();
    let anchor = PathAddress::new(vec![PathElement::new("host", "alpha")]);
    let proxy = Arc::new(RecordingProxy {
        anchor: anchor.clone(),
        received: Mutex::new(None),
    });
    controller
        .registry()
        .register_proxy_controller(&anchor, proxy.clone())
        .unwrap();

    let result = controller.execute(address_op(
        keys::READ_RESOURCE,
        &[("host", "alpha"), ("subsystem", "web")],
    ));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    assert_eq!(result.require(keys::RESULT).unwrap().as_str().unwrap(), "proxied");

    let received = proxy.received.lock().clone().unwrap();
    let rebased = PathAddress::from_value(received.require(keys::OP_ADDR).unwrap()).unwrap();
    assert_eq!(rebased.size(), 1);
    assert_eq!(rebased.element(0).unwrap().key(), "subsystem");
    assert_eq!(rebased.element(0).unwrap().value(), "web");
}

// ------------------------------------------------------------ cancellation

/// Parks until cancelled, then reports the cancellation terminal.
struct SlowHandler;

impl OperationHandler for SlowHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        _context: &OperationContext,
        _operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let flag = Arc::new(AtomicBool::new(false));
        let thread_flag = Arc::clone(&flag);
        std::thread::spawn(move || {
            while !thread_flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            sink.cancelled();
        });
        Ok(OperationResult {
            compensating: None,
            cancel: CancelHandle::from_flag(flag),
        })
    }
}

struct ChannelSink {
    terminal: mpsc::Sender<&'static str>,
}

impl ResultSink for ChannelSink {
    fn fragment(&self, _location: &[String], _value: Value) {}
    fn complete(&self) {
        let _ = self.terminal.send("complete");
    }
    fn failed(&self, _description: Value) {
        let _ = self.terminal.send("failed");
    }
    fn cancelled(&self) {
        let _ = self.terminal.send("cancelled");
    }
}

#[test]
fn test_cancellation_reaches_handler() {
    let controller = test_controller();
    controller
        .registry()
        .register_operation_handler("slow", Arc::new(SlowHandler), no_description(), true)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let handle = controller.execute_async(
        get_operation("slow", "attr1", 0),
        Arc::new(ChannelSink { terminal: tx }),
    );

    assert!(handle.cancel.cancel());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "cancelled");
    // a second cancel is a no-op
    assert!(!handle.cancel.cancel());
}

// ------------------------------------------------------------ runtime tasks

struct TaskRegisteringHandler {
    ran: Arc<AtomicBool>,
}

impl OperationHandler for TaskRegisteringHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        context: &OperationContext,
        _operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let ran = Arc::clone(&self.ran);
        context.register_runtime_task(Box::new(move || {
            ran.store(true, Ordering::SeqCst);
        }));
        sink.complete();
        Ok(OperationResult::empty())
    }
}

#[test]
fn test_runtime_task_runs_after_model_phase() {
    let controller = test_controller();
    let ran = Arc::new(AtomicBool::new(false));
    controller
        .registry()
        .register_operation_handler(
            "deferred",
            Arc::new(TaskRegisteringHandler { ran: Arc::clone(&ran) }),
            no_description(),
            true,
        )
        .unwrap();

    let result = controller.execute(get_operation("deferred", "attr1", 0));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "success");
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_runtime_task_skipped_on_rollback() {
    let controller = test_controller();
    let ran = Arc::new(AtomicBool::new(false));
    controller
        .registry()
        .register_operation_handler(
            "deferred",
            Arc::new(TaskRegisteringHandler { ran: Arc::clone(&ran) }),
            no_description(),
            true,
        )
        .unwrap();

    let steps = [
        get_operation("deferred", "attr1", 0),
        get_operation("bad", "attr2", 1),
    ];
    let result = controller.execute(get_composite(None, &steps));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(!ran.load(Ordering::SeqCst));

    // without rollback the deferred task still runs
    let result = controller.execute(get_composite(Some(false), &steps));
    assert_eq!(result.require(keys::OUTCOME).unwrap().as_str().unwrap(), "failed");
    assert!(ran.load(Ordering::SeqCst));
}

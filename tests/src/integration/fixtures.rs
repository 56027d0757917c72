//! Shared fixtures: a controller with a small model and the handlers
//! the scenarios exercise.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use castellan_controller::address::operation as make_operation;
use castellan_controller::keys;
use castellan_controller::ops::register_global_operations;
use castellan_controller::registry::no_description;
use castellan_controller::{
    BasicController, CancelHandle, ModelController, NullPersister, OperationContext,
    OperationFailed, OperationHandler, OperationKind, OperationResult, PathAddress, ResultSink,
};
use castellan_protocol::ManagementServer;
use castellan_value::Value;

/// Swaps an attribute value, reporting the previous value and a
/// compensating operation that swaps it back.
pub struct GoodHandler;

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
        let mut compensating = good_op(&attr, 0);
        compensating.insert(keys::VALUE, previous.clone())?;
        sink.fragment(&[], previous);
        sink.complete();
        Ok(OperationResult::with_compensating(compensating))
    }
}

/// Always fails after touching its submodel.
pub struct BadHandler;

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

/// Parks until cancelled, then reports the cancellation terminal.
pub struct SlowHandler;

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

/// `attr1=1, attr2=2`, plus a `subsystem/web` node.
pub fn test_model() -> Value {
    let mut model = Value::empty_object();
    model.insert("attr1", 1).unwrap();
    model.insert("attr2", 2).unwrap();
    model
        .get_mut("subsystem")
        .unwrap()
        .get_mut("web")
        .unwrap()
        .insert("port", 8080)
        .unwrap();
    model
}

pub fn test_controller(model: Value) -> Arc<BasicController> {
    let controller = Arc::new(BasicController::with_model(
        model,
        Arc::new(NullPersister),
        no_description(),
    ));
    let registry = controller.registry();
    registry
        .register_operation_handler("good", Arc::new(GoodHandler), no_description(), true)
        .unwrap();
    registry
        .register_operation_handler("bad", Arc::new(BadHandler), no_description(), true)
        .unwrap();
    registry
        .register_operation_handler("slow", Arc::new(SlowHandler), no_description(), true)
        .unwrap();
    register_global_operations(registry).unwrap();
    controller
}

pub async fn start_management_server(controller: Arc<BasicController>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ManagementServer::with_domain(
        Arc::clone(&controller) as Arc<dyn ModelController>,
        controller,
    );
    tokio::spawn(server.serve(listener));
    addr
}

pub fn good_op(attr: &str, value: i32) -> Value {
    let mut op = make_operation("good", &PathAddress::root());
    op.insert(keys::NAME, attr).unwrap();
    op.insert(keys::VALUE, value).unwrap();
    op
}

pub fn bad_op(attr: &str, value: i32) -> Value {
    let mut op = make_operation("bad", &PathAddress::root());
    op.insert(keys::NAME, attr).unwrap();
    op.insert(keys::VALUE, value).unwrap();
    op
}

pub fn composite(rollback: Option<bool>, steps: &[Value]) -> Value {
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

pub fn outcome(envelope: &Value) -> &str {
    envelope
        .require(keys::OUTCOME)
        .and_then(|o| o.as_str())
        .unwrap_or("missing")
}

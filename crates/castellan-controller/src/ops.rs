//! Global management operations.
//!
//! These are registered at the root as inherited handlers, so every
//! address answers them unless a subsystem shadows the name. The HTTP
//! gateway's GET defaults depend on `read-resource` being here.

use std::sync::Arc;

use castellan_value::Value;

use crate::address::{operation as make_operation, PathAddress, PathElement};
use crate::context::OperationContext;
use crate::error::{OperationFailed, RegistryError};
use crate::handler::{
    OperationHandler, OperationKind, OperationResult, ResultSink, EMPTY_LOCATION,
};
use crate::keys;
use crate::registry::{AccessType, DescriptionProvider, NodeRegistration};

/// Registers the standard operation set at the trie root, inherited.
pub fn register_global_operations(
    registry: &Arc<NodeRegistration>,
) -> Result<(), RegistryError> {
    let entries: [(&str, Arc<dyn OperationHandler>, &str); 8] = [
        (
            keys::READ_RESOURCE,
            Arc::new(ReadResourceHandler),
            "Reads a resource, optionally recursing into its children",
        ),
        (
            keys::READ_ATTRIBUTE,
            Arc::new(ReadAttributeHandler),
            "Reads a single attribute of a resource",
        ),
        (
            keys::WRITE_ATTRIBUTE,
            Arc::new(WriteAttributeHandler),
            "Writes a single attribute of a resource",
        ),
        (
            keys::READ_RESOURCE_DESCRIPTION,
            Arc::new(ReadResourceDescriptionHandler),
            "Reads the registered description of a resource",
        ),
        (
            keys::READ_OPERATION_NAMES,
            Arc::new(ReadOperationNamesHandler),
            "Lists the operation names visible at a resource",
        ),
        (
            keys::READ_OPERATION_DESCRIPTION,
            Arc::new(ReadOperationDescriptionHandler),
            "Reads the description of one operation",
        ),
        (
            keys::READ_CHILDREN_NAMES,
            Arc::new(ReadChildrenNamesHandler),
            "Lists the child names of a given type",
        ),
        (
            keys::DESCRIBE,
            Arc::new(DescribeHandler),
            "Emits the operations that would recreate a subtree",
        ),
    ];
    for (name, handler, description) in entries {
        registry.register_operation_handler(
            name,
            handler,
            op_description(name, description),
            true,
        )?;
    }
    Ok(())
}

fn op_description(name: &'static str, text: &'static str) -> Arc<dyn DescriptionProvider> {
    Arc::new(move || {
        let mut description = Value::empty_object();
        let _ = description.insert("operation-name", name);
        let _ = description.insert("description", text);
        description
    })
}

fn op_address(operation: &Value) -> Result<PathAddress, OperationFailed> {
    PathAddress::from_value(operation.find(keys::OP_ADDR).unwrap_or(&Value::Undefined))
        .map_err(|e| OperationFailed::msg(e.to_string()))
}

fn required_name(operation: &Value) -> Result<String, OperationFailed> {
    Ok(operation.require(keys::NAME)?.as_str()?.to_string())
}

pub struct ReadResourceHandler;

impl OperationHandler for ReadResourceHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let recursive = match operation.find(keys::RECURSIVE) {
            Some(v) if v.is_defined() => v.as_bool()?,
            _ => false,
        };
        let mut value = context
            .sub_model()
            .ok_or_else(|| OperationFailed::msg("read-resource requires a submodel"))?;
        if !recursive {
            // replace complex children with undefined placeholders
            if let Value::Object(map) = &mut value {
                for child in map.values_mut() {
                    if matches!(child, Value::Object(_) | Value::List(_)) {
                        child.clear();
                    }
                }
            }
        }
        sink.fragment(EMPTY_LOCATION, value);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct ReadAttributeHandler;

impl OperationHandler for ReadAttributeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let name = required_name(operation)?;
        let address = op_address(operation)?;
        if let Some(access) = context.registry().attribute_access(&address, &name) {
            if let Some(read_handler) = access.read_handler {
                return read_handler.execute(context, operation, sink);
            }
        }
        let value = context
            .sub_model()
            .and_then(|m| m.find(&name).cloned())
            .unwrap_or_default();
        sink.fragment(EMPTY_LOCATION, value);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct WriteAttributeHandler;

impl OperationHandler for WriteAttributeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let name = required_name(operation)?;
        let address = op_address(operation)?;
        let new_value = operation.require(keys::VALUE)?.clone();

        if let Some(access) = context.registry().attribute_access(&address, &name) {
            if matches!(access.access_type, AccessType::ReadOnly | AccessType::Metric) {
                return Err(OperationFailed::msg(format!(
                    "attribute {name} is not writable"
                )));
            }
            if let Some(write_handler) = access.write_handler {
                return write_handler.execute(context, operation, sink);
            }
        }

        let previous = context.with_sub_model(|model| -> Result<Value, OperationFailed> {
            let slot = model.get_mut(&name)?;
            let previous = slot.clone();
            *slot = new_value;
            Ok(previous)
        })??;

        let mut compensating = make_operation(keys::WRITE_ATTRIBUTE, &address);
        compensating.insert(keys::NAME, name)?;
        compensating.insert(keys::VALUE, previous)?;
        sink.complete();
        Ok(OperationResult::with_compensating(compensating))
    }
}

pub struct ReadResourceDescriptionHandler;

impl OperationHandler for ReadResourceDescriptionHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let address = op_address(operation)?;
        let description = context
            .registry()
            .model_description(&address)
            .unwrap_or_default();
        sink.fragment(EMPTY_LOCATION, description);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct ReadOperationNamesHandler;

impl OperationHandler for ReadOperationNamesHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let address = op_address(operation)?;
        let mut names = Value::empty_list();
        for name in context.registry().operation_names(&address) {
            names.push(name)?;
        }
        sink.fragment(EMPTY_LOCATION, names);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct ReadOperationDescriptionHandler;

impl OperationHandler for ReadOperationDescriptionHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let name = required_name(operation)?;
        let address = op_address(operation)?;
        let description = context
            .registry()
            .operation_description(&address, &name)
            .ok_or_else(|| {
                OperationFailed::msg(format!("no operation {name} registered at {address}"))
            })?;
        sink.fragment(EMPTY_LOCATION, description);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct ReadChildrenNamesHandler;

impl OperationHandler for ReadChildrenNamesHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let child_type = operation.require(keys::CHILD_TYPE)?.as_str()?.to_string();
        let sub_model = context
            .sub_model()
            .ok_or_else(|| OperationFailed::msg("read-children-names requires a submodel"))?;
        let container = sub_model.find(&child_type).ok_or_else(|| {
            OperationFailed::msg(format!("no known child type {child_type}"))
        })?;
        let mut names = Value::empty_list();
        for name in container.keys() {
            names.push(name)?;
        }
        sink.fragment(EMPTY_LOCATION, names);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

pub struct DescribeHandler;

impl OperationHandler for DescribeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn execute(
        &self,
        context: &OperationContext,
        operation: &Value,
        sink: Arc<dyn ResultSink>,
    ) -> Result<OperationResult, OperationFailed> {
        let address = op_address(operation)?;
        let sub_model = context
            .sub_model()
            .ok_or_else(|| OperationFailed::msg("describe requires a submodel"))?;
        let mut ops = Value::empty_list();
        describe_node(&address, &sub_model, &mut ops)?;
        sink.fragment(EMPTY_LOCATION, ops);
        sink.complete();
        Ok(OperationResult::empty())
    }
}

/// Emits `add` operations recreating `node` and its descendants. An
/// object child whose defined children are all objects is treated as a
/// child-type container; everything else is an attribute of the add.
fn describe_node(
    address: &PathAddress,
    node: &Value,
    ops: &mut Value,
) -> Result<(), OperationFailed> {
    let mut child_types: Vec<(String, Value)> = Vec::new();
    if !address.is_empty() {
        let mut add = make_operation(keys::ADD, address);
        if let Value::Object(map) = node {
            for (key, child) in map {
                if is_child_type_container(child) {
                    child_types.push((key.clone(), child.clone()));
                } else if child.is_defined() {
                    add.insert(key.clone(), child.clone())?;
                }
            }
        }
        ops.push(add)?;
    } else if let Value::Object(map) = node {
        for (key, child) in map {
            if is_child_type_container(child) {
                child_types.push((key.clone(), child.clone()));
            }
        }
    }
    for (child_type, container) in child_types {
        if let Value::Object(instances) = container {
            for (instance, child_node) in instances {
                let child_address =
                    address.append(PathElement::new(child_type.clone(), instance.clone()));
                describe_node(&child_address, &child_node, ops)?;
            }
        }
    }
    Ok(())
}

fn is_child_type_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty()
                && map
                    .values()
                    .all(|v| matches!(v, Value::Object(_)) || !v.is_defined())
        }
        _ => false,
    }
}

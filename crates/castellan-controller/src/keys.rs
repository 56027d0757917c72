//! Well-known keys and values of the management wire vocabulary.
//!
//! These strings are part of the external contract; clients match on
//! them byte for byte.

pub const OP: &str = "operation";
pub const OP_ADDR: &str = "address";
pub const OUTCOME: &str = "outcome";
pub const RESULT: &str = "result";
pub const FAILURE_DESCRIPTION: &str = "failure-description";
pub const COMPENSATING_OPERATION: &str = "compensating-operation";
pub const ROLLED_BACK: &str = "rolled-back";
pub const ROLLBACK_ON_RUNTIME_FAILURE: &str = "rollback-on-runtime-failure";
pub const STEPS: &str = "steps";

pub const COMPOSITE: &str = "composite";
pub const SUCCESS: &str = "success";
pub const FAILED: &str = "failed";
pub const CANCELLED: &str = "cancelled";

pub const NAME: &str = "name";
pub const VALUE: &str = "value";
pub const RECURSIVE: &str = "recursive";
pub const CHILD_TYPE: &str = "child-type";
pub const MODEL: &str = "model";

pub const READ_RESOURCE: &str = "read-resource";
pub const READ_ATTRIBUTE: &str = "read-attribute";
pub const WRITE_ATTRIBUTE: &str = "write-attribute";
pub const READ_RESOURCE_DESCRIPTION: &str = "read-resource-description";
pub const READ_OPERATION_NAMES: &str = "read-operation-names";
pub const READ_OPERATION_DESCRIPTION: &str = "read-operation-description";
pub const READ_CHILDREN_NAMES: &str = "read-children-names";
pub const DESCRIBE: &str = "describe";
pub const ADD: &str = "add";
pub const READ_CONFIG_AS_XML: &str = "read-config-as-xml";
pub const WRITE_MODEL: &str = "write-model";

//! Error types for the controller core.
//!
//! Errors that reach an operation boundary are converted into failure
//! descriptions inside the result envelope; they never tear down the
//! controller itself.

use thiserror::Error;

use castellan_value::{Value, ValueError};

/// Failure raised by an operation handler, carrying a structured
/// description for the envelope's `failure-description` field.
#[derive(Debug, Clone)]
pub struct OperationFailed {
    pub description: Value,
}

impl OperationFailed {
    pub fn new(description: Value) -> Self {
        OperationFailed { description }
    }

    /// Failure with a plain string description.
    pub fn msg(message: impl Into<String>) -> Self {
        OperationFailed {
            description: Value::String(message.into()),
        }
    }
}

impl std::fmt::Display for OperationFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation failed: {}", self.description)
    }
}

impl std::error::Error for OperationFailed {}

impl From<ValueError> for OperationFailed {
    fn from(e: ValueError) -> Self {
        OperationFailed::msg(e.to_string())
    }
}

/// Errors raised while dispatching an operation.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid operation format: {0}")]
    InvalidOperationFormat(String),

    #[error("no handler for {name} at address {address}")]
    NoSuchHandler { name: String, address: String },

    #[error("address conflict: {0}")]
    AddressConflict(String),

    #[error("no resource at address {0}")]
    NoSuchResource(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Errors raised by trie registration; lookups return `Option` instead.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("operation {name} already registered at {location}")]
    DuplicateOperation { name: String, location: String },

    #[error("attribute {name} already registered at {location}")]
    DuplicateAttribute { name: String, location: String },

    #[error("a child registration already exists at {0}")]
    DuplicateChild(String),

    #[error("a proxy controller owns the subtree at {0}; local registration is forbidden")]
    ProxyOwnsSubtree(String),

    #[error("proxy registration at {0} conflicts with existing registrations beneath it")]
    ProxyConflict(String),

    #[error("no registration at {0}")]
    NoSuchNode(String),
}

/// Errors raised by the configuration persister. Store failures are
/// logged as warnings by the controller and never surfaced to callers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed persisted configuration: {0}")]
    Malformed(String),

    #[error("load is not supported while an operation is in flight")]
    LoadUnsupported,
}

/// Renders an error and its source chain as a failure description: a
/// list of message strings, outermost first.
pub fn failure_description(err: &(dyn std::error::Error + 'static)) -> Value {
    let mut messages = Value::empty_list();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let _ = messages.push(e.to_string());
        current = e.source();
    }
    messages
}

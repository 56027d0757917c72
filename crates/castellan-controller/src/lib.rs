//! # Castellan Controller
//!
//! The management model controller: a tree-shaped live configuration
//! model addressed by `(type, name)` path elements, a registry of
//! operation handlers and proxy forwarders keyed by those addresses, and
//! a transactional multi-step engine with compensating operations.
//!
//! ## Execution flow
//!
//! ```text
//! operation ──▶ ControllerCore::execute
//!                 │ proxy owning the address?  ──▶ forward (rebased)
//!                 │ empty address + "composite" ──▶ multi-step engine
//!                 └ handler lookup ──▶ OperationContext ──▶ handler
//!                       │ success: write submodel back + persist
//!                       └ failure: failed envelope, tree untouched
//! ```
//!
//! Handlers are synchronous callbacks that may finish their sink later
//! from a task they spawn; the blocking entry point parks on a condvar
//! until the sink reaches a terminal state.

pub mod address;
pub mod composite;
pub mod context;
pub mod controller;
pub mod error;
pub mod handler;
pub mod keys;
pub mod model;
pub mod ops;
pub mod persist;
pub mod registry;

pub use address::{PathAddress, PathElement};
pub use context::{OperationContext, RuntimeTask};
pub use controller::{BasicController, ModelController};
pub use error::{ControllerError, OperationFailed, PersistenceError, RegistryError};
pub use handler::{
    CancelHandle, OperationHandler, OperationKind, OperationResult, ResultSink,
};
pub use persist::{ConfigurationPersister, FilePersister, NullPersister};
pub use registry::{
    AccessType, AttributeAccess, DescriptionProvider, NodeRegistration, ProxyController, Storage,
};

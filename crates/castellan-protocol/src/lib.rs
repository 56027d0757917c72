//! # Castellan Protocol
//!
//! The asynchronous management wire protocol: a framed binary exchange
//! carrying operations and streamed results between management clients,
//! standalone servers, host controllers, and the domain controller.
//!
//! ## Framing
//!
//! ```text
//! request:  handler-id | REQUEST_OPERATION | request-code | body
//! response: response-code | body
//! ```
//!
//! Bodies are sequences of tagged parameters: null-terminated UTF-8
//! strings, 4-byte big-endian integers, 1-byte booleans, and
//! length-prefixed values in the compact binary encoding. Asynchronous
//! executions stream zero or more result fragments and then exactly one
//! terminal tag per request id.

pub mod client;
pub mod codes;
mod error;
pub mod federation;
pub mod server;
pub mod sink;
pub mod stream;

pub use client::{AsyncExecution, AsyncTerminal, RemoteControllerClient};
pub use error::ProtocolError;
pub use federation::{DomainConnection, DomainControllerPort};
pub use server::ManagementServer;

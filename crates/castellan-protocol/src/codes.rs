//! The byte enumeration of the management protocol.
//!
//! These values are part of the wire contract and must stay stable
//! across releases. Handler ids select a server-side handler; request
//! and response codes frame individual exchanges; parameter tags prefix
//! every field in a body.

// handler ids
pub const HANDLER_CONTROLLER: u8 = 0x10;
pub const HANDLER_DOMAIN: u8 = 0x11;
pub const HANDLER_HOST: u8 = 0x12;

/// Frame marker following the handler id on every request.
pub const REQUEST_OPERATION: u8 = 0x22;

// request codes
pub const EXECUTE_SYNCHRONOUS_REQUEST: u8 = 0x45;
pub const EXECUTE_ASYNCHRONOUS_REQUEST: u8 = 0x47;
pub const CANCEL_ASYNCHRONOUS_OPERATION_REQUEST: u8 = 0x49;
pub const REGISTER_HOST_CONTROLLER_REQUEST: u8 = 0x50;
pub const UNREGISTER_HOST_CONTROLLER_REQUEST: u8 = 0x52;

// response codes
pub const EXECUTE_SYNCHRONOUS_RESPONSE: u8 = 0x46;
pub const EXECUTE_ASYNCHRONOUS_RESPONSE: u8 = 0x48;
pub const CANCEL_ASYNCHRONOUS_OPERATION_RESPONSE: u8 = 0x4a;
pub const REGISTER_HOST_CONTROLLER_RESPONSE: u8 = 0x51;
pub const UNREGISTER_HOST_CONTROLLER_RESPONSE: u8 = 0x53;
/// Framed rejection of a malformed request (unknown handler id or
/// request code); the body is a null-terminated message.
pub const PROTOCOL_ERROR_RESPONSE: u8 = 0x2f;

// parameter tags
pub const PARAM_OPERATION: u8 = 0x60;
pub const PARAM_REQUEST_ID: u8 = 0x61;
pub const PARAM_LOCATION: u8 = 0x62;
pub const PARAM_HANDLE_RESULT_FRAGMENT: u8 = 0x63;
pub const PARAM_HANDLE_RESULT_COMPLETE: u8 = 0x64;
pub const PARAM_HANDLE_RESULT_FAILED: u8 = 0x65;
pub const PARAM_HANDLE_CANCELLATION: u8 = 0x66;
pub const PARAM_HOST_ID: u8 = 0x67;
pub const PARAM_MODEL: u8 = 0x68;

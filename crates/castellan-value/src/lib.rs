//! # Castellan Value
//!
//! The self-describing dynamic value used everywhere in the management
//! layer: operations, results, descriptions, and the configuration model
//! itself are all [`Value`] trees.
//!
//! ## Design
//!
//! - Object keys keep insertion order (`IndexMap`), and both codecs
//!   preserve that order. Clients correlate composite step results by
//!   key order, so this is a hard requirement, not cosmetics.
//! - `get_mut` auto-creates undefined children, which gives the model its
//!   dynamic shape: handlers write into paths that may not exist yet.
//! - Two codecs: JSON for the HTTP gateway and config files, a compact
//!   tagged binary form for the wire protocol, plus a base64 wrapping of
//!   the binary form for `application/dmr-encoded` transport.

pub mod binary;
mod error;
mod json;
mod value;

pub use binary::{read_value, write_value, CodecError};
pub use error::ValueError;
pub use value::{Value, ValueType};

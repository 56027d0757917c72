use thiserror::Error;

use crate::value::ValueType;

/// Errors raised by typed access into a [`crate::Value`] tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The value exists but has an incompatible type.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },

    /// A numeric value does not fit the requested width.
    #[error("numeric value {0} out of range for the requested type")]
    OutOfRange(i64),

    /// A string could not be parsed as the requested scalar.
    #[error("cannot parse {0:?} as {1}")]
    Unparseable(String, ValueType),

    /// A required child key is absent or undefined.
    #[error("no defined child {0:?}")]
    NoSuchKey(String),

    /// A list index is out of bounds.
    #[error("index {0} out of bounds (len {1})")]
    IndexOutOfBounds(usize, usize),

    /// Input was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

//! Path addresses: ordered `(type, name)` pairs locating a node in the
//! management model.

use std::fmt;
use std::sync::Arc;

use castellan_value::Value;

use crate::error::ControllerError;
use crate::keys;

/// One element of a path address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        PathElement {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(\"{}\" => \"{}\")", self.key, self.value)
    }
}

/// An immutable address into the model tree. The empty address denotes
/// the root. Sub-addressing shares the underlying storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathAddress {
    elements: Arc<[PathElement]>,
    start: usize,
    end: usize,
}

impl PathAddress {
    /// The root address.
    pub fn root() -> Self {
        PathAddress {
            elements: Arc::from(Vec::new().into_boxed_slice()),
            start: 0,
            end: 0,
        }
    }

    pub fn new(elements: Vec<PathElement>) -> Self {
        let end = elements.len();
        PathAddress {
            elements: Arc::from(elements.into_boxed_slice()),
            start: 0,
            end,
        }
    }

    /// Parses the wire form: a list of single-entry `{type: name}`
    /// objects. An undefined value is the root address.
    pub fn from_value(value: &Value) -> Result<Self, ControllerError> {
        if !value.is_defined() {
            return Ok(PathAddress::root());
        }
        let items = value.as_list().map_err(|_| {
            ControllerError::InvalidOperationFormat(format!(
                "address must be a list, got {}",
                value.value_type()
            ))
        })?;
        let mut elements = Vec::with_capacity(items.len());
        for item in items {
            let map = item.as_object().map_err(|_| {
                ControllerError::InvalidOperationFormat(
                    "address elements must be single-entry objects".to_string(),
                )
            })?;
            let (key, name) = map.iter().next().ok_or_else(|| {
                ControllerError::InvalidOperationFormat("empty address element".to_string())
            })?;
            let name = name.as_str().map_err(|_| {
                ControllerError::InvalidOperationFormat(format!(
                    "address element {key} must name a string"
                ))
            })?;
            elements.push(PathElement::new(key, name));
        }
        Ok(PathAddress::new(elements))
    }

    /// Renders back to the wire form (a list of single-entry objects).
    pub fn to_value(&self) -> Value {
        let mut list = Value::empty_list();
        for element in self.iter() {
            // building into a fresh list cannot fail
            let _ = list.push_entry(element.key(), element.value());
        }
        list
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.elements[self.start..self.end].iter()
    }

    pub fn element(&self, index: usize) -> Option<&PathElement> {
        self.elements[self.start..self.end].get(index)
    }

    pub fn last_element(&self) -> Option<&PathElement> {
        self.elements[self.start..self.end].last()
    }

    /// The address from `from` to the end, sharing storage.
    pub fn sub_address(&self, from: usize) -> PathAddress {
        self.sub_address_range(from, self.size())
    }

    /// The address spanning `[from, to)`, sharing storage.
    pub fn sub_address_range(&self, from: usize, to: usize) -> PathAddress {
        let from = from.min(self.size());
        let to = to.clamp(from, self.size());
        PathAddress {
            elements: Arc::clone(&self.elements),
            start: self.start + from,
            end: self.start + to,
        }
    }

    /// A new address with `element` appended.
    pub fn append(&self, element: PathElement) -> PathAddress {
        let mut elements: Vec<PathElement> = self.iter().cloned().collect();
        elements.push(element);
        PathAddress::new(elements)
    }

    /// True when `self` is a prefix of `other` (or equal to it).
    pub fn is_prefix_of(&self, other: &PathAddress) -> bool {
        self.size() <= other.size() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, element) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{element}")?;
        }
        write!(f, "]")
    }
}

/// Convenience for building an operation value.
pub fn operation(name: &str, address: &PathAddress) -> Value {
    let mut op = Value::empty_object();
    let _ = op.insert(keys::OP, name);
    let _ = op.insert(keys::OP_ADDR, address.to_value());
    op
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(pairs: &[(&str, &str)]) -> PathAddress {
        PathAddress::new(
            pairs
                .iter()
                .map(|(k, v)| PathElement::new(*k, *v))
                .collect(),
        )
    }

    #[test]
    fn test_round_trip_through_value() {
        let a = addr(&[("host", "alpha"), ("subsystem", "web")]);
        let v = a.to_value();
        let back = PathAddress::from_value(&v).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn test_undefined_is_root() {
        let a = PathAddress::from_value(&Value::Undefined).unwrap();
        assert!(a.is_empty());
        assert_eq!(a, PathAddress::root());
    }

    #[test]
    fn test_sub_address_shares_elements() {
        let a = addr(&[("host", "alpha"), ("subsystem", "web"), ("connector", "http")]);
        let sub = a.sub_address(1);
        assert_eq!(sub.size(), 2);
        assert_eq!(sub.element(0).unwrap().key(), "subsystem");
        // a sub-address of a sub-address still indexes correctly
        let subsub = sub.sub_address(1);
        assert_eq!(subsub.element(0).unwrap().key(), "connector");
    }

    #[test]
    fn test_prefix() {
        let p = addr(&[("host", "alpha")]);
        let full = addr(&[("host", "alpha"), ("subsystem", "web")]);
        assert!(p.is_prefix_of(&full));
        assert!(!full.is_prefix_of(&p));
        assert!(PathAddress::root().is_prefix_of(&p));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let mut v = Value::empty_list();
        v.push(5).unwrap();
        assert!(matches!(
            PathAddress::from_value(&v),
            Err(ControllerError::InvalidOperationFormat(_))
        ));
    }
}

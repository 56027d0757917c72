//! The dynamic value type and its typed accessors.

use std::fmt;

use indexmap::IndexMap;

use crate::error::ValueError;

/// Discriminant of a [`Value`], used in diagnostics and codec tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Undefined,
    Boolean,
    Int,
    Long,
    Double,
    String,
    Bytes,
    List,
    Object,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Undefined => "undefined",
            ValueType::Boolean => "boolean",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
            ValueType::List => "list",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

/// A self-describing management value.
///
/// Everything that crosses the controller boundary is a `Value`:
/// operations, result envelopes, node descriptions, and the model tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    /// An empty object value.
    pub fn empty_object() -> Value {
        Value::Object(IndexMap::new())
    }

    /// An empty list value.
    pub fn empty_list() -> Value {
        Value::List(Vec::new())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Undefined => ValueType::Undefined,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::List(_) => ValueType::List,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    /// Mutable access to a named child, creating an undefined child if
    /// absent. An `Undefined` receiver silently becomes an object; any
    /// other non-object receiver is a type mismatch.
    pub fn get_mut(&mut self, key: &str) -> Result<&mut Value, ValueError> {
        if let Value::Undefined = self {
            *self = Value::empty_object();
        }
        match self {
            Value::Object(map) => Ok(map.entry(key.to_string()).or_default()),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Object,
                actual: other.value_type(),
            }),
        }
    }

    /// Walks a location path with [`Value::get_mut`] semantics, creating
    /// intermediate objects as needed.
    pub fn get_path_mut(&mut self, location: &[String]) -> Result<&mut Value, ValueError> {
        let mut node = self;
        for key in location {
            node = node.get_mut(key)?;
        }
        Ok(node)
    }

    /// Mutable access to a list element, growing the list with
    /// undefined elements as needed. An `Undefined` receiver becomes a
    /// list.
    pub fn get_index(&mut self, index: usize) -> Result<&mut Value, ValueError> {
        if let Value::Undefined = self {
            *self = Value::empty_list();
        }
        match self {
            Value::List(items) => {
                if items.len() <= index {
                    items.resize(index + 1, Value::Undefined);
                }
                Ok(&mut items[index])
            }
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::List,
                actual: other.value_type(),
            }),
        }
    }

    /// Non-mutating child lookup. Returns `None` for absent keys and for
    /// non-object receivers.
    pub fn find(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Non-mutating path lookup.
    pub fn find_path(&self, location: &[String]) -> Option<&Value> {
        let mut node = self;
        for key in location {
            node = node.find(key)?;
        }
        Some(node)
    }

    /// True only when the child exists *and* is defined.
    pub fn has(&self, key: &str) -> bool {
        self.find(key).map(Value::is_defined).unwrap_or(false)
    }

    /// Child lookup that fails with [`ValueError::NoSuchKey`] when the
    /// child is absent or undefined.
    pub fn require(&self, key: &str) -> Result<&Value, ValueError> {
        match self.find(key) {
            Some(v) if v.is_defined() => Ok(v),
            _ => Err(ValueError::NoSuchKey(key.to_string())),
        }
    }

    /// Inserts a child into an object, creating the object when the
    /// receiver is undefined.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ValueError> {
        *self.get_mut(&key.into())? = value.into();
        Ok(())
    }

    /// Removes and returns a child of an object.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.shift_remove(key),
            _ => None,
        }
    }

    /// Appends to a list, creating the list when the receiver is
    /// undefined.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<(), ValueError> {
        if let Value::Undefined = self {
            *self = Value::empty_list();
        }
        match self {
            Value::List(items) => {
                items.push(value.into());
                Ok(())
            }
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::List,
                actual: other.value_type(),
            }),
        }
    }

    /// Appends a single-entry object `{key: value}` to a list. This is
    /// the shape address lists use on the wire.
    pub fn push_entry(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ValueError> {
        let mut entry = Value::empty_object();
        entry.insert(key, value)?;
        self.push(entry)
    }

    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::String(s) => s
                .parse::<bool>()
                .map_err(|_| ValueError::Unparseable(s.clone(), ValueType::Boolean)),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Boolean,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_int(&self) -> Result<i32, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Long(l) => i32::try_from(*l).map_err(|_| ValueError::OutOfRange(*l)),
            Value::String(s) => s
                .parse::<i32>()
                .map_err(|_| ValueError::Unparseable(s.clone(), ValueType::Int)),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Int,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_long(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(i64::from(*i)),
            Value::Long(l) => Ok(*l),
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| ValueError::Unparseable(s.clone(), ValueType::Long)),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Long,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_double(&self) -> Result<f64, ValueError> {
        match self {
            Value::Int(i) => Ok(f64::from(*i)),
            Value::Long(l) => Ok(*l as f64),
            Value::Double(d) => Ok(*d),
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|_| ValueError::Unparseable(s.clone(), ValueType::Double)),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Double,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::String,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], ValueError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Bytes,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], ValueError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::List,
                actual: other.value_type(),
            }),
        }
    }

    pub fn as_object(&self) -> Result<&IndexMap<String, Value>, ValueError> {
        match self {
            Value::Object(map) => Ok(map),
            other => Err(ValueError::TypeMismatch {
                expected: ValueType::Object,
                actual: other.value_type(),
            }),
        }
    }

    /// Object keys in insertion order; empty for non-objects.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Resets the value to undefined.
    pub fn clear(&mut self) {
        *self = Value::Undefined;
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string(false))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_mut_autocreates() {
        let mut v = Value::Undefined;
        v.get_mut("a").unwrap().get_mut("b").unwrap();
        assert_eq!(v.value_type(), ValueType::Object);
        // the chain exists but the leaf is undefined
        assert!(!v.find("a").unwrap().has("b"));
        assert!(v.find_path(&["a".into(), "b".into()]).is_some());
    }

    #[test]
    fn test_get_mut_type_mismatch() {
        let mut v = Value::Int(3);
        let err = v.get_mut("a").unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: ValueType::Object,
                actual: ValueType::Int
            }
        );
    }

    #[test]
    fn test_has_only_defined() {
        let mut v = Value::empty_object();
        v.get_mut("present").unwrap();
        v.insert("defined", 1).unwrap();
        assert!(!v.has("present"));
        assert!(v.has("defined"));
        assert!(!v.has("absent"));
    }

    #[test]
    fn test_key_order_is_insertion_order() {
        let mut v = Value::empty_object();
        v.insert("zeta", 1).unwrap();
        v.insert("alpha", 2).unwrap();
        v.insert("mid", 3).unwrap();
        assert_eq!(v.keys(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::Int(7).as_long().unwrap(), 7);
        assert_eq!(Value::Int(7).as_double().unwrap(), 7.0);
        assert!(Value::Long(i64::MAX).as_int().is_err());
    }

    #[test]
    fn test_string_scalars_parse() {
        assert!(!Value::from("false").as_bool().unwrap());
        assert_eq!(Value::from("42").as_int().unwrap(), 42);
        assert!(Value::from("nope").as_int().is_err());
    }

    #[test]
    fn test_get_index_grows_list() {
        let mut v = Value::Undefined;
        *v.get_index(2).unwrap() = Value::from(9);
        let items = v.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Value::Undefined);
        assert_eq!(items[2], Value::Int(9));
        assert!(Value::from(true).get_index(0).is_err());
    }

    #[test]
    fn test_push_entry_address_shape() {
        let mut addr = Value::Undefined;
        addr.push_entry("host", "alpha").unwrap();
        addr.push_entry("subsystem", "web").unwrap();
        let items = addr.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].require("host").unwrap().as_str().unwrap(), "alpha");
    }
}

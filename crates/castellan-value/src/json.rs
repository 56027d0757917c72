//! JSON codec for [`Value`].
//!
//! `serde_json` is built with `preserve_order`, so object key order
//! survives both directions. Byte arrays cross the JSON boundary as
//! base64 strings; undefined maps to `null`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Number};

use crate::error::ValueError;
use crate::value::Value;

impl Value {
    /// Renders the value as a JSON string.
    pub fn to_json_string(&self, pretty: bool) -> String {
        let json = self.to_json();
        if pretty {
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| "null".to_string())
        } else {
            json.to_string()
        }
    }

    /// Converts to a `serde_json` tree.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined => serde_json::Value::Null,
            Value::Boolean(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Long(l) => json!(l),
            Value::Double(d) => Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::Bytes(b) => json!(BASE64.encode(b)),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(out)
            }
        }
    }

    /// Parses a JSON document into a value.
    pub fn from_json_str(input: &str) -> Result<Value, ValueError> {
        let json: serde_json::Value =
            serde_json::from_str(input).map_err(|e| ValueError::InvalidJson(e.to_string()))?;
        Ok(Value::from_json(&json))
    }

    /// Parses a JSON document from raw bytes.
    pub fn from_json_slice(input: &[u8]) -> Result<Value, ValueError> {
        let json: serde_json::Value =
            serde_json::from_slice(input).map_err(|e| ValueError::InvalidJson(e.to_string()))?;
        Ok(Value::from_json(&json))
    }

    /// Converts a `serde_json` tree into a value. Integral numbers that
    /// fit 32 bits become `Int`, wider ones `Long`, the rest `Double`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Undefined,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if let Ok(small) = i32::try_from(i) {
                        Value::Int(small)
                    } else {
                        Value::Long(i)
                    }
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut out = indexmap::IndexMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Value::from_json(v));
                }
                Value::Object(out)
            }
        }
    }
}

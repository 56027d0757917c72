//! Compact binary codec for [`Value`].
//!
//! One type-tag byte per node, big-endian fixed-width scalars, and
//! u32-length-prefixed UTF-8 strings and byte arrays. The tag bytes are
//! part of the wire contract and must stay stable across releases.
//!
//! A base64 wrapping of the same encoding carries values through
//! text-only transports (the `application/dmr-encoded` HTTP mode).

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::value::Value;

pub const TAG_UNDEFINED: u8 = 0x00;
pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_LONG: u8 = 0x03;
pub const TAG_DOUBLE: u8 = 0x04;
pub const TAG_STRING: u8 = 0x05;
pub const TAG_BYTES: u8 = 0x06;
pub const TAG_LIST: u8 = 0x07;
pub const TAG_OBJECT: u8 = 0x08;

/// Upper bound on a single encoded string/bytes segment; a corrupt
/// length prefix must not drive allocation.
const MAX_SEGMENT: u32 = 64 * 1024 * 1024;

/// Errors raised while encoding or decoding the binary form.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown value tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("segment length {0} exceeds limit")]
    SegmentTooLarge(u32),

    #[error("invalid UTF-8 in string segment")]
    InvalidUtf8,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Writes a value in the compact binary form.
pub fn write_value(out: &mut impl Write, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Undefined => out.write_all(&[TAG_UNDEFINED])?,
        Value::Boolean(b) => {
            out.write_all(&[TAG_BOOLEAN, u8::from(*b)])?;
        }
        Value::Int(i) => {
            out.write_all(&[TAG_INT])?;
            out.write_all(&i.to_be_bytes())?;
        }
        Value::Long(l) => {
            out.write_all(&[TAG_LONG])?;
            out.write_all(&l.to_be_bytes())?;
        }
        Value::Double(d) => {
            out.write_all(&[TAG_DOUBLE])?;
            out.write_all(&d.to_bits().to_be_bytes())?;
        }
        Value::String(s) => {
            out.write_all(&[TAG_STRING])?;
            write_segment(out, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            out.write_all(&[TAG_BYTES])?;
            write_segment(out, b)?;
        }
        Value::List(items) => {
            out.write_all(&[TAG_LIST])?;
            out.write_all(&(items.len() as u32).to_be_bytes())?;
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Object(map) => {
            out.write_all(&[TAG_OBJECT])?;
            out.write_all(&(map.len() as u32).to_be_bytes())?;
            for (key, child) in map {
                write_segment(out, key.as_bytes())?;
                write_value(out, child)?;
            }
        }
    }
    Ok(())
}

/// Reads one value in the compact binary form.
pub fn read_value(input: &mut impl Read) -> Result<Value, CodecError> {
    let tag = read_u8(input)?;
    match tag {
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_BOOLEAN => Ok(Value::Boolean(read_u8(input)? != 0)),
        TAG_INT => {
            let mut buf = [0u8; 4];
            input.read_exact(&mut buf)?;
            Ok(Value::Int(i32::from_be_bytes(buf)))
        }
        TAG_LONG => {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            Ok(Value::Long(i64::from_be_bytes(buf)))
        }
        TAG_DOUBLE => {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            Ok(Value::Double(f64::from_bits(u64::from_be_bytes(buf))))
        }
        TAG_STRING => Ok(Value::String(read_string(input)?)),
        TAG_BYTES => Ok(Value::Bytes(read_segment(input)?)),
        TAG_LIST => {
            let count = read_u32(input)?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value(input)?);
            }
            Ok(Value::List(items))
        }
        TAG_OBJECT => {
            let count = read_u32(input)?;
            let mut map = indexmap::IndexMap::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let key = read_string(input)?;
                let child = read_value(input)?;
                map.insert(key, child);
            }
            Ok(Value::Object(map))
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

impl Value {
    /// Encodes to the compact binary form in memory.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Vec<u8> writes cannot fail
        let _ = write_value(&mut out, self);
        out
    }

    /// Decodes from the compact binary form.
    pub fn from_binary(bytes: &[u8]) -> Result<Value, CodecError> {
        read_value(&mut std::io::Cursor::new(bytes))
    }

    /// Encodes as base64 over the binary form.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_binary())
    }

    /// Decodes a base64-wrapped binary value. Embedded ASCII whitespace
    /// is tolerated, matching what HTTP clients tend to send.
    pub fn from_base64(text: &str) -> Result<Value, CodecError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
        Value::from_binary(&bytes)
    }
}

fn write_segment(out: &mut impl Write, bytes: &[u8]) -> Result<(), CodecError> {
    out.write_all(&(bytes.len() as u32).to_be_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

fn read_segment(input: &mut impl Read) -> Result<Vec<u8>, CodecError> {
    let len = read_u32(input)?;
    if len > MAX_SEGMENT {
        return Err(CodecError::SegmentTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string(input: &mut impl Read) -> Result<String, CodecError> {
    String::from_utf8(read_segment(input)?).map_err(|_| CodecError::InvalidUtf8)
}

fn read_u8(input: &mut impl Read) -> Result<u8, CodecError> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(input: &mut impl Read) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let mut v = Value::empty_object();
        v.insert("operation", "write-attribute").unwrap();
        let addr = v.get_mut("address").unwrap();
        addr.push_entry("subsystem", "web").unwrap();
        v.insert("value", 9_000_000_000i64).unwrap();
        v.insert("ratio", 0.25).unwrap();
        v.insert("payload", Value::Bytes(vec![0, 255, 127])).unwrap();
        v.insert("pending", Value::Undefined).unwrap();
        v
    }

    #[test]
    fn test_binary_round_trip() {
        let v = sample();
        let back = Value::from_binary(&v.to_binary()).unwrap();
        assert_eq!(v, back);
        assert_eq!(back.keys(), v.keys());
    }

    #[test]
    fn test_base64_round_trip() {
        let v = sample();
        let back = Value::from_base64(&v.to_base64()).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = Value::from_binary(&[0x7f]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag(0x7f)));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut bytes = sample().to_binary();
        bytes.truncate(bytes.len() / 2);
        assert!(Value::from_binary(&bytes).is_err());
    }

    #[test]
    fn test_absurd_length_prefix_rejected() {
        // string tag followed by a length far past the segment cap
        let bytes = [TAG_STRING, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            Value::from_binary(&bytes),
            Err(CodecError::SegmentTooLarge(_))
        ));
    }
}

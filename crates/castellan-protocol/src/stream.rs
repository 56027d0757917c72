//! Primitive read/write helpers for the wire framing.
//!
//! Big-endian fixed-width integers, one-byte booleans, null-terminated
//! UTF-8 strings, and length-prefixed value payloads carried in the
//! compact binary form.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use castellan_value::Value;

use crate::error::ProtocolError;

/// Values larger than this are rejected before allocation.
const MAX_VALUE_BYTES: u32 = 64 * 1024 * 1024;

pub async fn read_u8<R: AsyncRead + Unpin>(input: &mut R) -> Result<u8, ProtocolError> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    Ok(buf[0])
}

/// Reads one byte and requires it to be `expected`.
pub async fn expect_header<R: AsyncRead + Unpin>(
    input: &mut R,
    expected: u8,
) -> Result<(), ProtocolError> {
    let actual = read_u8(input).await?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedHeader { expected, actual });
    }
    Ok(())
}

pub async fn read_i32<R: AsyncRead + Unpin>(input: &mut R) -> Result<i32, ProtocolError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    Ok(i32::from_be_bytes(buf))
}

pub async fn write_i32<W: AsyncWrite + Unpin>(
    out: &mut W,
    value: i32,
) -> Result<(), ProtocolError> {
    out.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_bool<R: AsyncRead + Unpin>(input: &mut R) -> Result<bool, ProtocolError> {
    Ok(read_u8(input).await? != 0)
}

pub async fn write_bool<W: AsyncWrite + Unpin>(
    out: &mut W,
    value: bool,
) -> Result<(), ProtocolError> {
    out.write_all(&[u8::from(value)]).await?;
    Ok(())
}

/// Reads a null-terminated UTF-8 string.
pub async fn read_utfz<R: AsyncRead + Unpin>(input: &mut R) -> Result<String, ProtocolError> {
    let mut bytes = Vec::new();
    loop {
        let b = read_u8(input).await?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Writes a string as UTF-8 bytes followed by a null terminator.
pub async fn write_utfz<W: AsyncWrite + Unpin>(
    out: &mut W,
    value: &str,
) -> Result<(), ProtocolError> {
    out.write_all(value.as_bytes()).await?;
    out.write_all(&[0]).await?;
    Ok(())
}

/// Reads a length-prefixed value payload.
pub async fn read_value<R: AsyncRead + Unpin>(input: &mut R) -> Result<Value, ProtocolError> {
    let len = read_i32(input).await? as u32;
    if len > MAX_VALUE_BYTES {
        return Err(ProtocolError::PayloadTooLarge(len));
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes).await.map_err(eof_as_closed)?;
    Ok(Value::from_binary(&bytes)?)
}

/// Writes a value payload with its length prefix.
pub async fn write_value<W: AsyncWrite + Unpin>(
    out: &mut W,
    value: &Value,
) -> Result<(), ProtocolError> {
    let bytes = value.to_binary();
    write_i32(out, bytes.len() as i32).await?;
    out.write_all(&bytes).await?;
    Ok(())
}

fn eof_as_closed(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

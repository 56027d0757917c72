use thiserror::Error;

use castellan_value::CodecError;

/// Errors raised on the management wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("expected tag 0x{expected:02x}, read 0x{actual:02x}")]
    UnexpectedHeader { expected: u8, actual: u8 },

    #[error("unknown handler id 0x{0:02x}")]
    UnknownHandlerId(u8),

    #[error("unknown request code 0x{0:02x}")]
    UnknownRequestCode(u8),

    #[error("unexpected response code 0x{0:02x}")]
    UnexpectedResponseCode(u8),

    #[error("value payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(u32),

    #[error("invalid UTF-8 in protocol string")]
    InvalidUtf8,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("connection closed mid-frame")]
    ConnectionClosed,

    #[error("peer rejected the request: {0}")]
    Rejected(String),
}

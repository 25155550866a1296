//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, handshaking or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake preamble mismatch: expected {expected:#010x}, got {actual:#010x}")]
    InvalidPreamble { expected: i32, actual: i32 },

    #[error("unknown protocol version: {0}")]
    UnknownVersion(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid message type tag: {0}")]
    InvalidMessageType(u8),

    #[error("invalid reply status tag: {0}")]
    InvalidStatus(u8),

    #[error("invalid frame flags: {0:#04x}")]
    InvalidFlags(u8),

    #[error("frame body shorter than its declared field lengths")]
    Truncated,

    #[error("frame body has {0} bytes past its declared fields")]
    TrailingBytes(usize),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

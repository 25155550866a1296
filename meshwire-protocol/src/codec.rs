//! Streaming encoder/decoder bound to a negotiated protocol version.

use crate::error::ProtocolError;
use crate::frame;
use crate::message::ProtocolMessage;
use crate::version::ProtocolVersion;
use bytes::BytesMut;

/// Encodes messages into frames for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    version: ProtocolVersion,
}

impl Encoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn encode(&self, message: &ProtocolMessage) -> Result<BytesMut, ProtocolError> {
        frame::encode_message(self.version, message)
    }
}

/// Reassembles frames from a byte stream and decodes messages.
#[derive(Debug)]
pub struct Decoder {
    version: ProtocolVersion,
    buffer: BytesMut,
}

impl Decoder {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends raw bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete message.
    pub fn decode(&mut self) -> Result<Option<ProtocolMessage>, ProtocolError> {
        frame::decode_message(self.version, &mut self.buffer)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

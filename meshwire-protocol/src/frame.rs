//! Binary frame formats.
//!
//! Handshake frame (6 bytes, both directions, before anything else):
//!
//! ```text
//! +----------+---------+
//! | preamble | version |
//! | i32 BE   | i16 BE  |
//! +----------+---------+
//! ```
//!
//! The preamble is the 32-bit hash of the cluster name; a mismatch means the
//! peer belongs to a different cluster and the connection is closed.
//!
//! Message frames after the handshake are length-delimited:
//!
//! ```text
//! +--------+------+-----------------------------------------+
//! | len    | type | fields                                  |
//! | u32 BE | u8   | (version- and type-dependent)           |
//! +--------+------+-----------------------------------------+
//! ```
//!
//! Request fields: id u64, sender host (u16 len + UTF-8), sender port u16,
//! subject (u16 len + UTF-8), payload (u32 len + bytes). Reply fields:
//! id u64, status u8, payload (u32 len + bytes). V2 inserts a flags byte
//! after the type tag; no flag bits are defined yet, so it must be zero.

use crate::error::ProtocolError;
use crate::message::{Address, ProtocolMessage, Reply, Request, Status};
use crate::version::ProtocolVersion;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the handshake frame in bytes.
pub const HANDSHAKE_LEN: usize = 6;

/// Upper bound on a whole frame body; headroom over the payload cap for the
/// envelope fields.
const MAX_FRAME_SIZE: usize = MAX_PAYLOAD_SIZE + 64 * 1024;

const TYPE_REQUEST: u8 = 0;
const TYPE_REPLY: u8 = 1;

/// Flag bits defined for V2 frames. None yet; the byte is reserved.
const V2_VALID_FLAGS_MASK: u8 = 0x00;

/// The 6-byte connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub preamble: i32,
    pub version: u16,
}

impl Handshake {
    pub fn new(preamble: i32, version: ProtocolVersion) -> Self {
        Self {
            preamble,
            version: version.number(),
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0..4].copy_from_slice(&self.preamble.to_be_bytes());
        buf[4..6].copy_from_slice(&(self.version as i16).to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Self {
        let preamble = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let version = i16::from_be_bytes([buf[4], buf[5]]) as u16;
        Self { preamble, version }
    }
}

/// Encodes a message into a complete length-prefixed frame.
pub fn encode_message(
    version: ProtocolVersion,
    message: &ProtocolMessage,
) -> Result<BytesMut, ProtocolError> {
    let payload_len = match message {
        ProtocolMessage::Request(r) => r.payload.len(),
        ProtocolMessage::Reply(r) => r.payload.len(),
    };
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut body = BytesMut::with_capacity(payload_len + 64);
    match message {
        ProtocolMessage::Request(request) => {
            body.put_u8(TYPE_REQUEST);
            if version >= ProtocolVersion::V2 {
                body.put_u8(0);
            }
            body.put_u64(request.id);
            put_str16(&mut body, &request.sender.host)?;
            body.put_u16(request.sender.port);
            put_str16(&mut body, &request.subject)?;
            body.put_u32(request.payload.len() as u32);
            body.put_slice(&request.payload);
        }
        ProtocolMessage::Reply(reply) => {
            body.put_u8(TYPE_REPLY);
            if version >= ProtocolVersion::V2 {
                body.put_u8(0);
            }
            body.put_u64(reply.id);
            body.put_u8(reply.status.tag());
            body.put_u32(reply.payload.len() as u32);
            body.put_slice(&reply.payload);
        }
    }

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.unsplit(body);
    Ok(frame)
}

/// Decodes the next message frame from the buffer.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
pub fn decode_message(
    version: ProtocolVersion,
    buf: &mut BytesMut,
) -> Result<Option<ProtocolMessage>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }

    buf.advance(4);
    let mut body = buf.split_to(len).freeze();

    let type_tag = get_u8(&mut body)?;
    if version >= ProtocolVersion::V2 {
        let flags = get_u8(&mut body)?;
        if flags & !V2_VALID_FLAGS_MASK != 0 {
            return Err(ProtocolError::InvalidFlags(flags));
        }
    }

    let message = match type_tag {
        TYPE_REQUEST => {
            let id = get_u64(&mut body)?;
            let host = get_str16(&mut body, "sender host")?;
            let port = get_u16(&mut body)?;
            let subject = get_str16(&mut body, "subject")?;
            let payload = get_bytes32(&mut body)?;
            ProtocolMessage::Request(Request {
                id,
                sender: Address::new(host, port),
                subject,
                payload,
            })
        }
        TYPE_REPLY => {
            let id = get_u64(&mut body)?;
            let status = Status::from_tag(get_u8(&mut body)?)?;
            let payload = get_bytes32(&mut body)?;
            ProtocolMessage::Reply(Reply {
                id,
                status,
                payload,
            })
        }
        other => return Err(ProtocolError::InvalidMessageType(other)),
    };

    // The declared length must cover the fields exactly; leftovers mean the
    // two sides disagree about the frame layout.
    if !body.is_empty() {
        return Err(ProtocolError::TrailingBytes(body.len()));
    }
    Ok(Some(message))
}

fn put_str16(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    if s.len() > u16::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: s.len(),
            max: u16::MAX as usize,
        });
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u16())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    if buf.remaining() < 8 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u64())
}

fn get_str16(buf: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

fn get_bytes32(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.split_to(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash32;

    fn sample_request() -> ProtocolMessage {
        ProtocolMessage::Request(Request::new(
            42,
            Address::new("127.0.0.1", 5001),
            "echo",
            Bytes::from_static(&[1, 2, 3]),
        ))
    }

    #[test]
    fn test_handshake_roundtrip() {
        let hs = Handshake::new(hash32("c1"), ProtocolVersion::latest());
        let decoded = Handshake::decode(&hs.encode());
        assert_eq!(decoded, hs);
        assert_eq!(decoded.version, 2);
    }

    #[test]
    fn test_handshake_negative_preamble() {
        // Preambles are hashes and routinely negative.
        let hs = Handshake::new(-123456789, ProtocolVersion::V1);
        assert_eq!(Handshake::decode(&hs.encode()).preamble, -123456789);
    }

    #[test]
    fn test_request_roundtrip_both_versions() {
        for version in ProtocolVersion::ALL {
            let mut buf = encode_message(version, &sample_request()).unwrap();
            let decoded = decode_message(version, &mut buf).unwrap().unwrap();
            assert_eq!(decoded, sample_request());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_reply_roundtrip() {
        let reply = ProtocolMessage::Reply(Reply::new(
            42,
            Status::ErrorHandlerException,
            Bytes::from_static(b"boom"),
        ));
        let mut buf = encode_message(ProtocolVersion::V2, &reply).unwrap();
        assert_eq!(decode_message(ProtocolVersion::V2, &mut buf).unwrap(), Some(reply));
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let reply = ProtocolMessage::Reply(Reply::new(1, Status::Ok, Bytes::new()));
        let mut buf = encode_message(ProtocolVersion::V1, &reply).unwrap();
        let decoded = decode_message(ProtocolVersion::V1, &mut buf).unwrap().unwrap();
        match decoded {
            ProtocolMessage::Reply(r) => assert!(r.payload.is_empty()),
            _ => panic!("expected reply"),
        }
    }

    #[test]
    fn test_incomplete_frame_returns_none() {
        let full = encode_message(ProtocolVersion::V2, &sample_request()).unwrap();
        for cut in [0, 3, 4, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(decode_message(ProtocolVersion::V2, &mut partial)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = encode_message(ProtocolVersion::V2, &sample_request()).unwrap();
        buf.unsplit(
            encode_message(
                ProtocolVersion::V2,
                &ProtocolMessage::Reply(Reply::new(43, Status::Ok, Bytes::new())),
            )
            .unwrap(),
        );

        assert!(decode_message(ProtocolVersion::V2, &mut buf)
            .unwrap()
            .unwrap()
            .is_request());
        let second = decode_message(ProtocolVersion::V2, &mut buf).unwrap().unwrap();
        assert_eq!(second.id(), 43);
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u8(9); // type
        buf.put_u8(0); // flags
        assert!(matches!(
            decode_message(ProtocolVersion::V2, &mut buf),
            Err(ProtocolError::InvalidMessageType(9))
        ));
    }

    #[test]
    fn test_nonzero_v2_flags_rejected() {
        let mut buf = encode_message(ProtocolVersion::V2, &sample_request()).unwrap();
        buf[5] = 0x04; // flags byte follows the 4-byte length and type tag
        assert!(matches!(
            decode_message(ProtocolVersion::V2, &mut buf),
            Err(ProtocolError::InvalidFlags(0x04))
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_u8(TYPE_REPLY);
        buf.put_u8(0);
        buf.put_u8(1); // declares a u64 id that is not there
        assert!(matches!(
            decode_message(ProtocolVersion::V2, &mut buf),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            decode_message(ProtocolVersion::V1, &mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversize_payload_rejected_on_encode() {
        let huge = ProtocolMessage::Reply(Reply::new(
            1,
            Status::Ok,
            Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]),
        ));
        assert!(matches!(
            encode_message(ProtocolVersion::V2, &huge),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_v1_frame_is_one_byte_shorter() {
        let v1 = encode_message(ProtocolVersion::V1, &sample_request()).unwrap();
        let v2 = encode_message(ProtocolVersion::V2, &sample_request()).unwrap();
        assert_eq!(v1.len() + 1, v2.len());
    }
}

//! Message envelopes exchanged between peers.

use crate::error::ProtocolError;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// A peer endpoint, `host:port`.
///
/// Addresses are the identity key for the channel pool and for the loopback
/// check, so equality is textual: `node-1:5000` and the IP it resolves to are
/// distinct addresses. Resolution to a socket address happens at connect and
/// bind time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_socket(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::InvalidAddress(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Outcome of handling a request, carried on every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    ErrorNoHandler,
    ErrorHandlerException,
    ProtocolException,
}

impl Status {
    /// Stable wire tag for this status.
    pub const fn tag(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::ErrorNoHandler => 1,
            Status::ErrorHandlerException => 2,
            Status::ProtocolException => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Status::Ok),
            1 => Ok(Status::ErrorNoHandler),
            2 => Ok(Status::ErrorHandlerException),
            3 => Ok(Status::ProtocolException),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

/// A request addressed to a subject on the receiving peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlation id, unique among the sender's in-flight requests.
    pub id: u64,
    /// Return address of the sending node.
    pub sender: Address,
    /// Routing key the receiver resolves to a handler.
    pub subject: String,
    pub payload: Bytes,
}

impl Request {
    pub fn new(id: u64, sender: Address, subject: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id,
            sender,
            subject: subject.into(),
            payload,
        }
    }
}

/// A reply correlated to a request by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: u64,
    pub status: Status,
    pub payload: Bytes,
}

impl Reply {
    pub fn new(id: u64, status: Status, payload: Bytes) -> Self {
        Self {
            id,
            status,
            payload,
        }
    }
}

/// Either side of the request/reply exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    Request(Request),
    Reply(Reply),
}

impl ProtocolMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, ProtocolMessage::Request(_))
    }

    /// Correlation id of the underlying message.
    pub fn id(&self) -> u64 {
        match self {
            ProtocolMessage::Request(r) => r.id,
            ProtocolMessage::Reply(r) => r.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_parse() {
        let addr = Address::new("127.0.0.1", 5001);
        assert_eq!(addr.to_string(), "127.0.0.1:5001");
        assert_eq!("127.0.0.1:5001".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_parse_rejects_garbage() {
        assert!("no-port".parse::<Address>().is_err());
        assert!("host:notaport".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_from_socket() {
        let sock: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let addr = Address::from_socket(sock);
        assert_eq!(addr, Address::new("10.0.0.1", 9000));
    }

    #[test]
    fn test_status_tags_roundtrip() {
        for status in [
            Status::Ok,
            Status::ErrorNoHandler,
            Status::ErrorHandlerException,
            Status::ProtocolException,
        ] {
            assert_eq!(Status::from_tag(status.tag()).unwrap(), status);
        }
        assert!(matches!(
            Status::from_tag(9),
            Err(ProtocolError::InvalidStatus(9))
        ));
    }

    #[test]
    fn test_message_id() {
        let req = Request::new(7, Address::new("a", 1), "echo", Bytes::new());
        assert_eq!(ProtocolMessage::Request(req).id(), 7);
        let reply = Reply::new(8, Status::Ok, Bytes::new());
        assert!(!ProtocolMessage::Reply(reply).is_request());
    }
}

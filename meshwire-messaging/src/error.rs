//! Messaging error types.

use meshwire_protocol::ProtocolError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the messaging service.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("no remote handler registered for the subject")]
    NoRemoteHandler,

    #[error("remote handler failed")]
    RemoteHandlerFailure,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("peer reported a protocol exception")]
    PeerProtocolException,

    #[error("request timed out in {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect failed: {0}")]
    Connect(Arc<MessagingError>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("startup failed: {0}")]
    Startup(String),
}

impl MessagingError {
    /// True for request-level outcomes that leave the channel healthy.
    ///
    /// Everything else on a send path (write failures, unexpected I/O
    /// errors) closes the channel and evicts it from the pool.
    pub fn is_messaging_fault(&self) -> bool {
        matches!(
            self,
            MessagingError::NoRemoteHandler
                | MessagingError::RemoteHandlerFailure
                | MessagingError::Protocol(_)
                | MessagingError::PeerProtocolException
                | MessagingError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_faults_keep_the_channel() {
        assert!(MessagingError::NoRemoteHandler.is_messaging_fault());
        assert!(MessagingError::RemoteHandlerFailure.is_messaging_fault());
        assert!(MessagingError::PeerProtocolException.is_messaging_fault());
        assert!(MessagingError::Timeout(Duration::from_millis(200)).is_messaging_fault());
    }

    #[test]
    fn test_transport_failures_close_the_channel() {
        let io = MessagingError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert!(!io.is_messaging_fault());
        assert!(!MessagingError::ConnectionClosed.is_messaging_fault());
        assert!(!MessagingError::Startup("bind".into()).is_messaging_fault());
    }

    #[test]
    fn test_timeout_display_in_millis() {
        let err = MessagingError::Timeout(Duration::from_millis(230));
        assert!(err.to_string().contains("230 ms"));
    }
}

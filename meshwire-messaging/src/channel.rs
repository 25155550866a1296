//! A connected socket endpoint with its negotiated codec.

use crate::error::MessagingError;
use crate::stream::MaybeTlsStream;
use meshwire_protocol::{Encoder, ProtocolMessage, ProtocolVersion};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

/// One end of an established, handshaken connection.
///
/// The read half lives in the channel's reader task; the channel itself owns
/// the write half behind a lock, so frames from concurrent senders are
/// written whole and in FIFO order.
pub(crate) struct Channel {
    id: u64,
    peer: SocketAddr,
    encoder: Encoder,
    writer: Mutex<WriteHalf<MaybeTlsStream>>,
    active: AtomicBool,
}

impl Channel {
    pub fn new(
        id: u64,
        peer: SocketAddr,
        version: ProtocolVersion,
        writer: WriteHalf<MaybeTlsStream>,
    ) -> Self {
        Self {
            id,
            peer,
            encoder: Encoder::new(version),
            writer: Mutex::new(writer),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn version(&self) -> ProtocolVersion {
        self.encoder.version()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Encodes and writes one message frame.
    pub async fn write_message(&self, message: &ProtocolMessage) -> Result<(), MessagingError> {
        if !self.is_active() {
            return Err(MessagingError::ConnectionClosed);
        }
        let frame = self.encoder.encode(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }

    /// Shuts the socket down. Idempotent.
    pub async fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("version", &self.version())
            .field("active", &self.is_active())
            .finish()
    }
}

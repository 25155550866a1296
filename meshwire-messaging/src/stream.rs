//! Stream abstraction for TLS and plain TCP.
//!
//! Every node dials out and accepts in the same process, so one enum covers
//! the plain stream and both TLS roles.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

pin_project! {
    /// A connection stream: plain TCP, or TLS in either role.
    #[project = MaybeTlsStreamProj]
    pub enum MaybeTlsStream {
        Plain { #[pin] stream: TcpStream },
        TlsClient { #[pin] stream: ClientTlsStream<TcpStream> },
        TlsServer { #[pin] stream: ServerTlsStream<TcpStream> },
    }
}

impl MaybeTlsStream {
    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        !matches!(self, MaybeTlsStream::Plain { .. })
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            MaybeTlsStreamProj::TlsClient { stream } => stream.poll_read(cx, buf),
            MaybeTlsStreamProj::TlsServer { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            MaybeTlsStreamProj::TlsClient { stream } => stream.poll_write(cx, buf),
            MaybeTlsStreamProj::TlsServer { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_flush(cx),
            MaybeTlsStreamProj::TlsClient { stream } => stream.poll_flush(cx),
            MaybeTlsStreamProj::TlsServer { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            MaybeTlsStreamProj::TlsClient { stream } => stream.poll_shutdown(cx),
            MaybeTlsStreamProj::TlsServer { stream } => stream.poll_shutdown(cx),
        }
    }
}

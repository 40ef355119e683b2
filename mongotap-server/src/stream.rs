//! Stream abstraction over plain TCP and both TLS directions.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

pin_project! {
    /// A byte stream that is plain TCP, an accepted TLS connection (client
    /// side of the proxy), or an initiated TLS connection (upstream side).
    #[project = ProxyStreamProj]
    pub enum ProxyStream {
        Plain { #[pin] stream: TcpStream },
        ServerTls { #[pin] stream: ServerTlsStream<TcpStream> },
        ClientTls { #[pin] stream: ClientTlsStream<TcpStream> },
    }
}

impl ProxyStream {
    pub fn is_tls(&self) -> bool {
        !matches!(self, ProxyStream::Plain { .. })
    }
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ProxyStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ProxyStreamProj::ServerTls { stream } => stream.poll_read(cx, buf),
            ProxyStreamProj::ClientTls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ProxyStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ProxyStreamProj::ServerTls { stream } => stream.poll_write(cx, buf),
            ProxyStreamProj::ClientTls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ProxyStreamProj::Plain { stream } => stream.poll_flush(cx),
            ProxyStreamProj::ServerTls { stream } => stream.poll_flush(cx),
            ProxyStreamProj::ClientTls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ProxyStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ProxyStreamProj::ServerTls { stream } => stream.poll_shutdown(cx),
            ProxyStreamProj::ClientTls { stream } => stream.poll_shutdown(cx),
        }
    }
}

//! Name resolution and stream establishment.
//!
//! Resources never open sockets themselves; they go through a
//! [`Connector`]. [`TcpConnector`] is the production implementation: DNS
//! via tokio, TCP connects tried address by address, then TLS for secure
//! schemes. Tests substitute in-memory connectors.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::url::Url;

/// Opens byte streams for resources.
pub trait Connector: Send + Sync + 'static {
    /// Stream produced by [`Connector::connect`].
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Resolve `host` to candidate addresses.
    fn resolve(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = io::Result<Vec<SocketAddr>>> + Send;

    /// Connect to one of `addrs` and complete any TLS handshake `url` calls
    /// for.
    fn connect(
        &self,
        url: &Url,
        addrs: &[SocketAddr],
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum MaybeTlsStream {
    /// `ws` connections.
    Plain(TcpStream),
    /// `wss` connections.
    #[cfg(feature = "tls-rustls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls-rustls")]
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// DNS plus TCP, with TLS for `wss`/`https`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    #[cfg(feature = "tls-rustls")]
    tls: crate::tls::TlsConnector,
}

impl TcpConnector {
    /// Connector verifying certificates against the webpki roots, leniently
    /// if `accept_invalid_certificates` is set.
    ///
    /// # Errors
    ///
    /// `Error::Tls` if the TLS configuration cannot be built.
    pub fn new(accept_invalid_certificates: bool) -> Result<Self> {
        #[cfg(feature = "tls-rustls")]
        {
            let config = crate::tls::client_config(accept_invalid_certificates)?;
            Ok(Self::with_tls_config(config))
        }
        #[cfg(not(feature = "tls-rustls"))]
        {
            let _ = accept_invalid_certificates;
            Ok(Self {})
        }
    }

    /// Connector using a caller-built rustls configuration.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            tls: crate::tls::TlsConnector::new(config),
        }
    }
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        trace!(%addr, "connecting");
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                // Small frames must not wait behind Nagle.
                let _ = stream.set_nodelay(true);
                debug!(%addr, "TCP connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect failed");
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => Error::Io("no addresses to connect to".into()),
    })
}

impl Connector for TcpConnector {
    type Stream = MaybeTlsStream;

    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
        debug!(host, port, count = addrs.len(), "resolved");
        Ok(addrs)
    }

    async fn connect(&self, url: &Url, addrs: &[SocketAddr]) -> Result<MaybeTlsStream> {
        let tcp = connect_any(addrs).await?;
        if !url.is_secure() {
            return Ok(MaybeTlsStream::Plain(tcp));
        }
        #[cfg(feature = "tls-rustls")]
        {
            let tls = self.tls.connect(url.bare_host(), tcp).await?;
            Ok(MaybeTlsStream::Tls(Box::new(tls)))
        }
        #[cfg(not(feature = "tls-rustls"))]
        {
            drop(tcp);
            Err(Error::Tls("built without TLS support".into()))
        }
    }
}

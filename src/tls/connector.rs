use std::sync::Arc;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::{Error, Result};

/// Client-side TLS handshakes with a shared configuration.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

impl TlsConnector {
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Run the TLS handshake over `stream`. `host` is used for SNI and
    /// certificate name checks; IP literals are accepted.
    ///
    /// # Errors
    ///
    /// `Error::Tls` for an unusable host name or a failed handshake.
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|_| Error::Tls(format!("invalid server name: {host}")))?;
        let stream = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        debug!(host, "TLS established");
        Ok(stream)
    }
}

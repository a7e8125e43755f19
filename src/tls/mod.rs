//! TLS for `wss` connections, backed by rustls.
//!
//! Server certificates are checked against the bundled webpki roots. With
//! `accept_invalid_certificates` set, [`LenientVerifier`] lets two failures
//! through: an issuer that does not chain to a trusted root and a name
//! mismatch. Expired, revoked or malformed certificates are still refused.

mod connector;
mod verifier;

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

pub use connector::TlsConnector;
pub use verifier::LenientVerifier;

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn webpki_roots() -> RootCertStore {
    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

/// Client configuration trusting the webpki roots.
///
/// # Errors
///
/// `Error::Tls` if the crypto provider rejects the protocol versions or the
/// verifier cannot be built.
pub fn client_config(accept_invalid_certificates: bool) -> Result<Arc<ClientConfig>> {
    client_config_with_roots(webpki_roots(), accept_invalid_certificates)
}

/// Client configuration trusting `roots` only.
///
/// # Errors
///
/// See [`client_config`].
pub fn client_config_with_roots(
    roots: RootCertStore,
    accept_invalid_certificates: bool,
) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if accept_invalid_certificates {
        let verifier = LenientVerifier::new(Arc::new(roots), provider())?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Arc::new(config))
}

//! Backend selection.
//!
//! [`ResourceFactory`] validates the target URL and builds the backend named
//! by its [`ResourceConfig`], handing the result back behind the
//! [`WebSocketResource`] trait so callers never see which one they got.

use std::sync::Arc;

use tracing::debug;

use crate::config::{Backend, ResourceConfig};
use crate::error::{Error, Result};
use crate::resource::{MessageSocketResource, StreamResource, WebSocketResource};
use crate::transport::{Connector, TcpConnector};
use crate::url::Url;

/// Builds resources sharing one configuration and connector.
#[derive(Debug, Clone)]
pub struct ResourceFactory<C: Connector = TcpConnector> {
    config: ResourceConfig,
    connector: Arc<C>,
}

impl ResourceFactory<TcpConnector> {
    /// Factory over real TCP/TLS connections.
    ///
    /// # Errors
    ///
    /// `Error::Tls` if the TLS configuration cannot be built.
    pub fn new(config: ResourceConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.accept_invalid_certificates)?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Factory configured from the environment.
    ///
    /// # Errors
    ///
    /// See [`ResourceFactory::new`].
    pub fn from_env() -> Result<Self> {
        Self::new(ResourceConfig::from_env())
    }
}

impl<C: Connector> ResourceFactory<C> {
    /// Factory over a caller-supplied connector.
    #[must_use]
    pub fn with_connector(config: ResourceConfig, connector: Arc<C>) -> Self {
        Self { config, connector }
    }

    /// Configuration applied to every resource.
    #[must_use]
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Build a resource for `url`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` if `url` does not parse, `Error::InvalidArgument`
    /// for schemes other than `ws` and `wss`, and `Error::Io` if the callback
    /// thread cannot be started.
    pub fn make(&self, url: &str) -> Result<Arc<dyn WebSocketResource>> {
        self.make_for(&Url::parse(url)?)
    }

    /// Build a resource for an already parsed URL.
    ///
    /// # Errors
    ///
    /// See [`ResourceFactory::make`].
    pub fn make_for(&self, url: &Url) -> Result<Arc<dyn WebSocketResource>> {
        if !matches!(url.scheme.as_str(), "ws" | "wss") {
            return Err(Error::InvalidArgument(format!(
                "unsupported scheme: {}",
                url.scheme
            )));
        }
        debug!(backend = %self.config.backend, url = %url, port = url.port_or_default(), "creating resource");
        let resource: Arc<dyn WebSocketResource> = match self.config.backend {
            Backend::Stream => Arc::new(StreamResource::new(
                self.connector.clone(),
                self.config.clone(),
            )?),
            Backend::MessageSocket => Arc::new(MessageSocketResource::new(
                self.connector.clone(),
                self.config.clone(),
            )?),
        };
        Ok(resource)
    }
}

/// Build a resource for `url` using the environment configuration.
///
/// # Errors
///
/// See [`ResourceFactory::make`] and [`ResourceFactory::new`].
pub fn make(url: &str) -> Result<Arc<dyn WebSocketResource>> {
    ResourceFactory::from_env()?.make(url)
}

/// Build a resource for `url` over `connector`.
///
/// # Errors
///
/// See [`ResourceFactory::make`].
pub fn make_with_connector<C: Connector>(
    url: &str,
    config: ResourceConfig,
    connector: Arc<C>,
) -> Result<Arc<dyn WebSocketResource>> {
    ResourceFactory::with_connector(config, connector).make(url)
}

//! # ws-bridge - WebSocket client resources for embedded scripting runtimes
//!
//! `ws-bridge` gives a host application one WebSocket client connection per
//! resource, with a callback surface shaped for scripting-runtime bindings:
//! non-blocking `connect`/`send`/`ping`/`close` calls, and handlers invoked
//! serially on a dedicated callback thread.
//!
//! ## Features
//!
//! - **Two interchangeable backends** behind [`WebSocketResource`]: an
//!   in-crate RFC 6455 stack on its own I/O thread, and a tokio-tungstenite
//!   socket on a shared runtime
//! - **Ordered delivery**: writes leave in call order, one at a time
//! - **Graceful teardown**: dropping a resource closes it with `GoingAway`
//!   and waits for the background side before returning
//! - **TLS** for `wss://` through rustls, with optional exceptions for
//!   self-signed and name-mismatched certificates
//! - **Injectable transports** through the [`Connector`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use ws_bridge::CloseCode;
//!
//! # fn main() -> ws_bridge::Result<()> {
//! let resource = ws_bridge::make("wss://echo.example.com/socket")?;
//! resource.set_on_message(Arc::new(|len: usize, payload: String, binary: bool| {
//!     println!("{len} bytes (binary: {binary}): {payload}");
//! }));
//! resource.connect("wss://echo.example.com/socket", &[], &HashMap::new());
//! resource.send("hello");
//! resource.close(CloseCode::Normal, "bye");
//! # Ok(())
//! # }
//! ```

pub mod close_code;
pub mod codec;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod factory;
pub mod message;
pub mod protocol;
pub mod resource;
pub mod transport;
pub mod url;

#[cfg(feature = "tls-rustls")]
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use close_code::CloseCode;
pub use config::{Backend, Config, Limits, ResourceConfig};
pub use connection::{Connection, ReadyState, Role};
pub use error::{Error, ErrorType, ResourceError, Result};
pub use factory::{ResourceFactory, make, make_with_connector};
pub use resource::{MessageSocketResource, OutgoingMessage, StreamResource, WebSocketResource};
pub use transport::{Connector, TcpConnector};
pub use url::Url;

//! The backend-agnostic resource contract.
//!
//! A [`WebSocketResource`] is one client connection driven on a background
//! context. API calls never block on the network: they post work to the
//! background side and return. Outcomes come back through the registered
//! handlers, which run one at a time on a dedicated callback thread.
//!
//! Two backends implement the contract:
//!
//! - [`StreamResource`] drives the in-crate protocol stack from a dedicated
//!   I/O thread with a single-threaded event loop.
//! - [`MessageSocketResource`] drives a message-oriented socket
//!   (tokio-tungstenite) with tasks on a shared background runtime and a
//!   mutex-guarded outbound queue.

mod dispatch;
mod headers;
mod message_socket;
mod stream;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use tracing::trace;

use crate::close_code::CloseCode;
use crate::error::{ErrorType, ResourceError};
use crate::transport::Connector;
use crate::url::Url;

pub use crate::connection::ReadyState;
pub use message_socket::MessageSocketResource;
pub use stream::StreamResource;

pub(crate) use dispatch::{DispatchQueue, Dispatcher};
pub(crate) use headers::request_headers;

/// Invoked once the opening handshake completes.
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
/// Invoked after a ping frame has been written.
pub type PingHandler = Arc<dyn Fn() + Send + Sync>;
/// Invoked after a data message has been written, with its payload size.
pub type SendHandler = Arc<dyn Fn(usize) + Send + Sync>;
/// Invoked per received message with `(length, payload, is_binary)`.
/// Binary payloads arrive Base64-encoded; `length` is the raw byte count.
pub type MessageHandler = Arc<dyn Fn(usize, String, bool) + Send + Sync>;
/// Invoked once when the resource reaches `Closed` after being open.
pub type CloseHandler = Arc<dyn Fn(CloseCode, String) + Send + Sync>;
/// Invoked for every failure.
pub type ErrorHandler = Arc<dyn Fn(ResourceError) + Send + Sync>;

/// One client WebSocket connection.
///
/// All methods are non-blocking and callable from any thread. `send`,
/// `ping` and `close` issued before the connection opens are held until it
/// does; after `Closed` they do nothing.
pub trait WebSocketResource: Send + Sync {
    /// Start connecting. `options` are extra request headers; an `Origin`
    /// header is derived from `url` unless one is given. Only the first
    /// call has any effect.
    fn connect(&self, url: &str, protocols: &[String], options: &HashMap<String, String>);

    /// Queue a text message.
    fn send(&self, message: &str);

    /// Queue a binary message given as Base64.
    fn send_binary(&self, base64: &str);

    /// Queue an empty ping.
    fn ping(&self);

    /// Close with `code` and `reason`. Only the first call counts.
    fn close(&self, code: CloseCode, reason: &str);

    /// Current state; never blocks.
    fn ready_state(&self) -> ReadyState;

    fn set_on_connect(&self, handler: ConnectHandler);
    fn set_on_ping(&self, handler: PingHandler);
    fn set_on_send(&self, handler: SendHandler);
    fn set_on_message(&self, handler: MessageHandler);
    fn set_on_close(&self, handler: CloseHandler);
    fn set_on_error(&self, handler: ErrorHandler);
}

/// A queued data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Text, or Base64 for binary messages.
    pub payload: String,
    /// Whether `payload` is Base64-encoded binary data.
    pub is_binary: bool,
}

impl OutgoingMessage {
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            is_binary: false,
        }
    }

    #[must_use]
    pub fn binary(base64: impl Into<String>) -> Self {
        Self {
            payload: base64.into(),
            is_binary: true,
        }
    }
}

/// Registered handlers. Each slot is read when a callback is posted, so
/// replacing a handler does not affect callbacks already scheduled.
#[derive(Default)]
pub(crate) struct Handlers {
    connect: RwLock<Option<ConnectHandler>>,
    ping: RwLock<Option<PingHandler>>,
    send: RwLock<Option<SendHandler>>,
    message: RwLock<Option<MessageHandler>>,
    close: RwLock<Option<CloseHandler>>,
    error: RwLock<Option<ErrorHandler>>,
}

impl Handlers {
    pub(crate) fn set_connect(&self, handler: ConnectHandler) {
        *self.connect.write() = Some(handler);
    }

    pub(crate) fn set_ping(&self, handler: PingHandler) {
        *self.ping.write() = Some(handler);
    }

    pub(crate) fn set_send(&self, handler: SendHandler) {
        *self.send.write() = Some(handler);
    }

    pub(crate) fn set_message(&self, handler: MessageHandler) {
        *self.message.write() = Some(handler);
    }

    pub(crate) fn set_close(&self, handler: CloseHandler) {
        *self.close.write() = Some(handler);
    }

    pub(crate) fn set_error(&self, handler: ErrorHandler) {
        *self.error.write() = Some(handler);
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("connect", &self.connect.read().is_some())
            .field("ping", &self.ping.read().is_some())
            .field("send", &self.send.read().is_some())
            .field("message", &self.message.read().is_some())
            .field("close", &self.close.read().is_some())
            .field("error", &self.error.read().is_some())
            .finish()
    }
}

/// Posts handler invocations to the callback thread.
#[derive(Clone)]
pub(crate) struct EventSink {
    handlers: Arc<Handlers>,
    queue: DispatchQueue,
}

impl EventSink {
    pub(crate) fn new(handlers: Arc<Handlers>, queue: DispatchQueue) -> Self {
        Self { handlers, queue }
    }

    pub(crate) fn connected(&self) {
        if let Some(handler) = self.handlers.connect.read().clone() {
            self.queue.post(move || handler());
        }
    }

    pub(crate) fn pinged(&self) {
        if let Some(handler) = self.handlers.ping.read().clone() {
            self.queue.post(move || handler());
        }
    }

    pub(crate) fn sent(&self, bytes: usize) {
        if let Some(handler) = self.handlers.send.read().clone() {
            self.queue.post(move || handler(bytes));
        }
    }

    pub(crate) fn message(&self, length: usize, payload: String, is_binary: bool) {
        if let Some(handler) = self.handlers.message.read().clone() {
            self.queue.post(move || handler(length, payload, is_binary));
        }
    }

    pub(crate) fn closed(&self, code: CloseCode, reason: String) {
        if let Some(handler) = self.handlers.close.read().clone() {
            self.queue.post(move || handler(code, reason));
        }
    }

    pub(crate) fn error(&self, error: ResourceError) {
        tracing::debug!(kind = %error.kind, message = %error.message, "resource error");
        if let Some(handler) = self.handlers.error.read().clone() {
            self.queue.post(move || handler(error));
        }
    }
}

/// One-shot "background work finished" signal that `Drop` can wait on with
/// a deadline.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn release(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    /// Wait until released or `timeout` elapses. Returns whether released.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            let _ = self.cond.wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }
}

/// Resolve and connect, tagging failures with the stage they happened in.
pub(crate) async fn open_transport<C: Connector>(
    connector: &C,
    url: &Url,
) -> Result<C::Stream, ResourceError> {
    let port = url.port_or_default();
    trace!(host = url.bare_host(), port, "resolving");
    let addrs = connector
        .resolve(url.bare_host(), port)
        .await
        .map_err(|e| ResourceError::new(ErrorType::Resolution, format!("{}: {e}", url.host)))?;
    if addrs.is_empty() {
        return Err(ResourceError::new(
            ErrorType::Resolution,
            format!("{}: no addresses", url.host),
        ));
    }
    trace!(count = addrs.len(), "connecting");
    connector
        .connect(url, &addrs)
        .await
        .map_err(|e| ResourceError::new(ErrorType::Connection, e.to_string()))
}

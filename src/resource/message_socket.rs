//! Resource backed by tokio-tungstenite.
//!
//! Every resource of this kind runs on one shared background runtime.
//! API calls push operations onto a mutex-guarded queue, since a `send`
//! can arrive from the caller's thread while the connect task is still
//! resolving. Once open, a sequencer drains that queue one write at a time
//! while a reader runs beside it in the same task.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Runtime;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WsCloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{WebSocketStream, client_async_with_config};
use tracing::{debug, trace, warn};

use super::{
    CloseHandler, ConnectHandler, Dispatcher, ErrorHandler, EventSink, Handlers, Latch,
    MessageHandler, OutgoingMessage, PingHandler, SendHandler, WebSocketResource,
    open_transport, request_headers,
};
use crate::close_code::CloseCode;
use crate::config::{Config, ResourceConfig};
use crate::connection::{ReadyState, SharedReadyState};
use crate::encoding::{decode_base64, encode_base64};
use crate::error::{Error, ErrorType, ResourceError};
use crate::protocol::frame::truncate_close_reason;
use crate::protocol::is_reserved_header;
use crate::transport::Connector;
use crate::url::Url;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

static RUNTIME: OnceLock<io::Result<Runtime>> = OnceLock::new();

fn background() -> Result<&'static Runtime, ResourceError> {
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("ws-bridge-socket")
                .enable_all()
                .build()
        })
        .as_ref()
        .map_err(|e| {
            ResourceError::new(
                ErrorType::Connection,
                format!("failed to start background runtime: {e}"),
            )
        })
}

#[derive(Debug)]
enum Op {
    Message(OutgoingMessage),
    Ping,
    Close,
}

struct Inner {
    state: SharedReadyState,
    close_request: OnceLock<(CloseCode, String)>,
    peer_closed: AtomicBool,
    ops: Mutex<VecDeque<Op>>,
    wake: Notify,
    finished: Latch,
    events: EventSink,
}

impl Inner {
    fn push(&self, op: Op) {
        self.ops.lock().push_back(op);
        self.wake.notify_one();
    }

    fn pop(&self) -> Option<Op> {
        self.ops.lock().pop_front()
    }

    fn discard_ops(&self) -> usize {
        let mut ops = self.ops.lock();
        let dropped = ops.len();
        ops.clear();
        dropped
    }

    fn finish(&self) {
        if !self.state.advance(ReadyState::Closed) {
            return;
        }
        let dropped = self.discard_ops();
        let (code, reason) = self
            .close_request
            .get()
            .cloned()
            .unwrap_or((CloseCode::Abnormal, String::new()));
        debug!(%code, reason = %reason, dropped, "closed");
        self.events.closed(code, reason);
    }
}

enum Launch {
    Idle,
    Running(JoinHandle<()>),
    Done,
}

/// WebSocket resource driven by tasks on a shared background runtime.
pub struct MessageSocketResource<C: Connector> {
    inner: Arc<Inner>,
    handlers: Arc<Handlers>,
    connector: Arc<C>,
    config: ResourceConfig,
    launch: Mutex<Launch>,
    dispatcher: Dispatcher,
}

impl<C: Connector> MessageSocketResource<C> {
    /// Create an idle resource.
    ///
    /// # Errors
    ///
    /// Failure to start the callback thread.
    pub fn new(connector: Arc<C>, config: ResourceConfig) -> crate::Result<Self> {
        let dispatcher = Dispatcher::spawn("ws-bridge-callbacks")?;
        let handlers = Arc::new(Handlers::default());
        Ok(Self {
            inner: Arc::new(Inner {
                state: SharedReadyState::new(),
                close_request: OnceLock::new(),
                peer_closed: AtomicBool::new(false),
                ops: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                finished: Latch::default(),
                events: EventSink::new(handlers.clone(), dispatcher.queue()),
            }),
            handlers,
            connector,
            config,
            launch: Mutex::new(Launch::Idle),
            dispatcher,
        })
    }

    fn fail_launch(&self, error: ResourceError) {
        self.inner.events.error(error);
        self.inner.discard_ops();
        self.inner.state.advance(ReadyState::Closed);
        self.inner.finished.release();
    }
}

impl<C: Connector> WebSocketResource for MessageSocketResource<C> {
    fn connect(&self, url: &str, protocols: &[String], options: &HashMap<String, String>) {
        let mut launch = self.launch.lock();
        if !matches!(*launch, Launch::Idle) {
            warn!(url, "connect called on a resource that already started");
            return;
        }
        *launch = Launch::Done;

        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                self.fail_launch(ResourceError::new(ErrorType::Connection, e.to_string()));
                return;
            }
        };
        let runtime = match background() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.fail_launch(e);
                return;
            }
        };
        debug!(url = %url, "connecting");

        let attempt = Attempt {
            inner: self.inner.clone(),
            connector: self.connector.clone(),
            socket_config: socket_config(&self.config.codec),
            headers: request_headers(&url, options),
            protocols: protocols.to_vec(),
            url,
        };
        *launch = Launch::Running(runtime.spawn(attempt.run()));
    }

    fn send(&self, message: &str) {
        if !self.inner.state.get().is_closed() {
            self.inner.push(Op::Message(OutgoingMessage::text(message)));
        }
    }

    fn send_binary(&self, base64: &str) {
        if !self.inner.state.get().is_closed() {
            self.inner.push(Op::Message(OutgoingMessage::binary(base64)));
        }
    }

    fn ping(&self) {
        if !self.inner.state.get().is_closed() {
            self.inner.push(Op::Ping);
        }
    }

    fn close(&self, code: CloseCode, reason: &str) {
        if self.inner.state.get().is_closed()
            || self
                .inner
                .close_request
                .set((code, reason.to_owned()))
                .is_err()
        {
            trace!(%code, "close already requested");
            return;
        }
        let mut launch = self.launch.lock();
        if matches!(*launch, Launch::Idle) {
            *launch = Launch::Done;
            self.inner.discard_ops();
            self.inner.state.advance(ReadyState::Closed);
            self.inner.finished.release();
            return;
        }
        self.inner
            .state
            .transition(ReadyState::Open, ReadyState::Closing);
        self.inner.push(Op::Close);
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.state.get()
    }

    fn set_on_connect(&self, handler: ConnectHandler) {
        self.handlers.set_connect(handler);
    }

    fn set_on_ping(&self, handler: PingHandler) {
        self.handlers.set_ping(handler);
    }

    fn set_on_send(&self, handler: SendHandler) {
        self.handlers.set_send(handler);
    }

    fn set_on_message(&self, handler: MessageHandler) {
        self.handlers.set_message(handler);
    }

    fn set_on_close(&self, handler: CloseHandler) {
        self.handlers.set_close(handler);
    }

    fn set_on_error(&self, handler: ErrorHandler) {
        self.handlers.set_error(handler);
    }
}

impl<C: Connector> Drop for MessageSocketResource<C> {
    fn drop(&mut self) {
        self.close(CloseCode::GoingAway, "Terminating instance");
        let launch = std::mem::replace(&mut *self.launch.lock(), Launch::Done);
        if let Launch::Running(task) = launch {
            if !self.inner.finished.wait(self.config.drop_grace) {
                warn!(grace = ?self.config.drop_grace, "close did not finish in time, aborting");
                task.abort();
            }
        }
        self.dispatcher.shutdown();
    }
}

fn socket_config(codec: &Config) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(codec.limits.max_message_size))
        .max_frame_size(Some(codec.limits.max_frame_size))
}

/// Upgrade request for `url`. The scheme is normalized to `ws`/`wss` and
/// the default port dropped so the generated `Host` header matches the
/// in-crate handshake.
fn client_request(
    url: &Url,
    protocols: &[String],
    headers: &[(String, String)],
) -> crate::Result<Request> {
    let scheme = if url.is_secure() { "wss" } else { "ws" };
    let uri = format!("{scheme}://{}{}", url.authority(), url.target());
    let mut request = uri
        .as_str()
        .into_client_request()
        .map_err(|e| Error::InvalidUrl(e.to_string()))?;
    let map = request.headers_mut();
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", ")).map_err(|e| {
            Error::InvalidHeaderValue {
                header: "Sec-WebSocket-Protocol".to_owned(),
                reason: e.to_string(),
            }
        })?;
        map.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    for (name, value) in headers {
        if is_reserved_header(name) {
            warn!(header = %name, "ignoring caller-supplied handshake header");
            continue;
        }
        let invalid = |reason: String| Error::InvalidHeaderValue {
            header: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(request)
}

fn close_message(request: Option<&(CloseCode, String)>) -> WsMessage {
    let frame = request.and_then(|(code, reason)| {
        code.wire_code().map(|_| WsCloseFrame {
            code: (*code).into(),
            reason: truncate_close_reason(reason).to_owned().into(),
        })
    });
    WsMessage::Close(frame)
}

/// Connect-phase state, moved into the background task.
struct Attempt<C: Connector> {
    inner: Arc<Inner>,
    connector: Arc<C>,
    socket_config: WebSocketConfig,
    url: Url,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
}

impl<C: Connector> Attempt<C> {
    async fn establish(&self) -> Result<WebSocketStream<C::Stream>, ResourceError> {
        let stream = open_transport(self.connector.as_ref(), &self.url).await?;
        let request = client_request(&self.url, &self.protocols, &self.headers)
            .map_err(|e| ResourceError::new(ErrorType::Handshake, e.to_string()))?;
        let (socket, response) = client_async_with_config(request, stream, Some(self.socket_config))
            .await
            .map_err(|e| ResourceError::new(ErrorType::Handshake, e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "handshake complete");
        Ok(socket)
    }

    async fn run(self) {
        let inner = self.inner.clone();
        match self.establish().await {
            Ok(socket) => {
                inner.state.advance(ReadyState::Open);
                inner.events.connected();
                drive(&inner, socket).await;
            }
            Err(e) => {
                let dropped = inner.discard_ops();
                debug!(error = %e, dropped, "connect failed");
                inner.events.error(e);
                inner.state.advance(ReadyState::Closed);
            }
        }
        inner.finished.release();
    }
}

#[derive(Debug)]
enum ReadOutcome {
    /// The stream ended, after the peer's close frame if one arrived.
    Ended(Option<(CloseCode, String)>),
    TransportDied(String),
    Failed(String),
    Stopped,
}

async fn drive<S>(inner: &Inner, socket: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = socket.split();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let stop = Notify::new();
    let stop = &stop;
    let reader = async move {
        let _ = outcome_tx.send(read_loop(inner, stream, stop).await);
    };
    let sequencer = async move {
        Sequencer {
            inner,
            sink,
            close_sent: false,
        }
        .run(outcome_rx)
        .await;
        stop.notify_one();
    };
    tokio::join!(reader, sequencer);
}

fn transport_died(e: &WsError) -> bool {
    matches!(
        e,
        WsError::Io(_) | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

async fn read_loop<S>(
    inner: &Inner,
    mut stream: SplitStream<WebSocketStream<S>>,
    stop: &Notify,
) -> ReadOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut peer_close = None;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            () = stop.notified() => return ReadOutcome::Stopped,
        };
        match next {
            Some(Ok(WsMessage::Text(text))) => {
                if inner.state.get() == ReadyState::Open {
                    inner
                        .events
                        .message(text.as_str().len(), text.as_str().to_owned(), false);
                } else {
                    trace!("discarding text received while closing");
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                if inner.state.get() == ReadyState::Open {
                    inner.events.message(data.len(), encode_base64(&data), true);
                } else {
                    trace!("discarding binary received while closing");
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let (code, reason) = frame.map_or((CloseCode::NoStatus, String::new()), |f| {
                    (CloseCode::from(f.code), f.reason.to_string())
                });
                debug!(%code, "peer sent close");
                // A local close requested earlier keeps its code.
                let _ = inner.close_request.set((code, reason.clone()));
                inner.peer_closed.store(true, Ordering::Release);
                inner.state.advance(ReadyState::Closing);
                // The echo goes out on the next poll of the stream.
                peer_close = Some((code, reason));
            }
            Some(Ok(_)) => {}
            None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                return ReadOutcome::Ended(peer_close);
            }
            Some(Err(e)) if transport_died(&e) => {
                if peer_close.is_some() {
                    return ReadOutcome::Ended(peer_close);
                }
                return ReadOutcome::TransportDied(e.to_string());
            }
            Some(Err(e)) => return ReadOutcome::Failed(e.to_string()),
        }
    }
}

/// Drains the operation queue in order, one write at a time.
struct Sequencer<'a, S> {
    inner: &'a Inner,
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    close_sent: bool,
}

impl<S> Sequencer<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self, mut outcome: oneshot::Receiver<ReadOutcome>) {
        loop {
            while let Some(op) = self.inner.pop() {
                if self.step(op).await {
                    return;
                }
            }
            tokio::select! {
                () = self.inner.wake.notified() => {}
                result = &mut outcome => {
                    self.conclude(result.unwrap_or(ReadOutcome::Stopped)).await;
                    return;
                }
            }
        }
    }

    /// No data may follow our close frame or the peer's.
    fn writes_stopped(&self) -> bool {
        self.close_sent
            || self.inner.peer_closed.load(Ordering::Acquire)
            || self.inner.state.get().is_closed()
    }

    /// Perform one operation. Returns `true` once the resource is closed.
    async fn step(&mut self, op: Op) -> bool {
        match op {
            Op::Message(_) | Op::Ping if self.writes_stopped() => {
                debug!("dropping write queued behind close");
                false
            }
            Op::Message(outgoing) => {
                self.write_message(outgoing).await;
                false
            }
            Op::Ping => {
                match self.sink.send(WsMessage::Ping(Default::default())).await {
                    Ok(()) => self.inner.events.pinged(),
                    Err(e) => self
                        .inner
                        .events
                        .error(ResourceError::new(ErrorType::Ping, e.to_string())),
                }
                false
            }
            Op::Close => self.send_close().await,
        }
    }

    async fn write_message(&mut self, outgoing: OutgoingMessage) {
        let (message, bytes) = if outgoing.is_binary {
            match decode_base64(&outgoing.payload) {
                Ok(data) => {
                    let bytes = data.len();
                    (WsMessage::Binary(data.into()), bytes)
                }
                Err(e) => {
                    self.inner
                        .events
                        .error(ResourceError::new(ErrorType::Send, e.to_string()));
                    return;
                }
            }
        } else {
            let bytes = outgoing.payload.len();
            (WsMessage::Text(outgoing.payload.into()), bytes)
        };
        match self.sink.send(message).await {
            Ok(()) => {
                trace!(bytes, "message written");
                self.inner.events.sent(bytes);
            }
            Err(e) => self
                .inner
                .events
                .error(ResourceError::new(ErrorType::Send, e.to_string())),
        }
    }

    async fn send_close(&mut self) -> bool {
        if self.writes_stopped() {
            return false;
        }
        debug!("closing");
        self.inner.state.advance(ReadyState::Closing);
        match self
            .sink
            .send(close_message(self.inner.close_request.get()))
            .await
        {
            Ok(()) => {
                debug!("close frame written");
                self.close_sent = true;
                false
            }
            Err(e) => {
                self.inner
                    .events
                    .error(ResourceError::new(ErrorType::Close, e.to_string()));
                self.inner.finish();
                true
            }
        }
    }

    async fn conclude(&mut self, outcome: ReadOutcome) {
        match outcome {
            ReadOutcome::Ended(Some(peer)) => {
                let _ = self.inner.close_request.set(peer);
            }
            ReadOutcome::Ended(None) | ReadOutcome::Stopped => {}
            ReadOutcome::TransportDied(_) if self.close_sent => {
                debug!("transport closed after close frame");
            }
            ReadOutcome::TransportDied(message) => {
                warn!(error = %message, "transport terminated unexpectedly");
                self.inner
                    .events
                    .error(ResourceError::new(ErrorType::Receive, message.clone()));
                let _ = self.inner.close_request.set((
                    CloseCode::BadPayload,
                    format!("Underlying connection terminated: {message}"),
                ));
            }
            ReadOutcome::Failed(message) => {
                self.inner
                    .events
                    .error(ResourceError::new(ErrorType::Receive, message.clone()));
                let _ = self
                    .inner
                    .close_request
                    .set((CloseCode::ProtocolError, message));
                if !self.close_sent {
                    let close = close_message(self.inner.close_request.get());
                    if let Err(e) = self.sink.send(close).await {
                        debug!(error = %e, "close after protocol error failed");
                    }
                }
            }
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.sink.close())
            .await
            .is_err()
        {
            trace!("sink shutdown timed out");
        }
        self.inner.finish();
    }
}

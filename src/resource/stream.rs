//! Resource backed by the in-crate protocol stack.
//!
//! Each resource owns one I/O thread running a single-threaded tokio
//! runtime. The event loop on that thread is the only place connection
//! state changes: API calls arrive as [`Command`]s, and every read or write
//! runs as a spawned task that hands its half of the connection back
//! through a completion channel. Holding a half is what makes an operation
//! single-flight, so at most one read and one write are ever outstanding.
//!
//! Write priority when the writer is idle: pong replies, then queued data
//! in FIFO order, then pings, then the close frame.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, trace, warn};

use super::{
    CloseHandler, ConnectHandler, Dispatcher, ErrorHandler, EventSink, Handlers, Latch,
    MessageHandler, OutgoingMessage, PingHandler, SendHandler, WebSocketResource,
    open_transport, request_headers,
};
use crate::close_code::CloseCode;
use crate::config::{Config, ResourceConfig};
use crate::connection::{
    ConnectionReader, ConnectionWriter, ReadyState, SharedReadyState, client_upgrade,
};
use crate::encoding::{decode_base64, encode_base64};
use crate::error::{Error, ErrorType, ResourceError};
use crate::message::{self, CloseFrame, Message};
use crate::protocol::ClientHandshake;
use crate::transport::Connector;
use crate::url::Url;

type Reader<S> = ConnectionReader<ReadHalf<S>>;
type Writer<S> = ConnectionWriter<WriteHalf<S>>;

/// How long the writer gets to shut down the stream once closed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Command {
    Send(OutgoingMessage),
    Ping,
    Close,
}

/// State visible to both the API side and the I/O thread.
struct Shared {
    state: SharedReadyState,
    close_request: OnceLock<(CloseCode, String)>,
    abort: Notify,
    finished: Latch,
}

enum Launch {
    Idle(mpsc::UnboundedReceiver<Command>),
    Running(JoinHandle<()>),
    Done,
}

/// WebSocket resource driven by a dedicated I/O thread.
pub struct StreamResource<C: Connector> {
    shared: Arc<Shared>,
    handlers: Arc<Handlers>,
    events: EventSink,
    connector: Arc<C>,
    config: ResourceConfig,
    commands: mpsc::UnboundedSender<Command>,
    launch: Mutex<Launch>,
    dispatcher: Dispatcher,
}

impl<C: Connector> StreamResource<C> {
    /// Create an idle resource. Nothing touches the network until
    /// [`WebSocketResource::connect`].
    ///
    /// # Errors
    ///
    /// Failure to start the callback thread.
    pub fn new(connector: Arc<C>, config: ResourceConfig) -> crate::Result<Self> {
        let dispatcher = Dispatcher::spawn("ws-bridge-callbacks")?;
        let handlers = Arc::new(Handlers::default());
        let (commands, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            shared: Arc::new(Shared {
                state: SharedReadyState::new(),
                close_request: OnceLock::new(),
                abort: Notify::new(),
                finished: Latch::default(),
            }),
            events: EventSink::new(handlers.clone(), dispatcher.queue()),
            handlers,
            connector,
            config,
            commands,
            launch: Mutex::new(Launch::Idle(receiver)),
            dispatcher,
        })
    }

    fn fail_launch(&self, error: ResourceError) {
        self.events.error(error);
        self.shared.state.advance(ReadyState::Closed);
        self.shared.finished.release();
    }
}

impl<C: Connector> WebSocketResource for StreamResource<C> {
    fn connect(&self, url: &str, protocols: &[String], options: &HashMap<String, String>) {
        let mut launch = self.launch.lock();
        let commands = match std::mem::replace(&mut *launch, Launch::Done) {
            Launch::Idle(commands) => commands,
            other => {
                *launch = other;
                warn!(url, "connect called on a resource that already started");
                return;
            }
        };

        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                self.fail_launch(ResourceError::new(ErrorType::Connection, e.to_string()));
                return;
            }
        };
        debug!(url = %url, "connecting");

        let pipeline = Pipeline {
            shared: self.shared.clone(),
            events: self.events.clone(),
            connector: self.connector.clone(),
            codec: self.config.codec.clone(),
            headers: request_headers(&url, options),
            protocols: protocols.to_vec(),
            url,
        };
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("ws-bridge-io".to_owned())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        runtime.block_on(pipeline.run(commands));
                        runtime.shutdown_background();
                    }
                    Err(e) => {
                        pipeline.events.error(ResourceError::new(
                            ErrorType::Connection,
                            format!("failed to start I/O runtime: {e}"),
                        ));
                        shared.state.advance(ReadyState::Closed);
                    }
                }
                shared.finished.release();
            });
        match spawned {
            Ok(handle) => *launch = Launch::Running(handle),
            Err(e) => self.fail_launch(ResourceError::new(
                ErrorType::Connection,
                format!("failed to start I/O thread: {e}"),
            )),
        }
    }

    fn send(&self, message: &str) {
        if !self.shared.state.get().is_closed() {
            let _ = self
                .commands
                .send(Command::Send(OutgoingMessage::text(message)));
        }
    }

    fn send_binary(&self, base64: &str) {
        if !self.shared.state.get().is_closed() {
            let _ = self
                .commands
                .send(Command::Send(OutgoingMessage::binary(base64)));
        }
    }

    fn ping(&self) {
        if !self.shared.state.get().is_closed() {
            let _ = self.commands.send(Command::Ping);
        }
    }

    fn close(&self, code: CloseCode, reason: &str) {
        if self.shared.state.get().is_closed()
            || self
                .shared
                .close_request
                .set((code, reason.to_owned()))
                .is_err()
        {
            trace!(%code, "close already requested");
            return;
        }
        let mut launch = self.launch.lock();
        if matches!(*launch, Launch::Idle(_)) {
            // Never connected: nothing to close.
            *launch = Launch::Done;
            self.shared.state.advance(ReadyState::Closed);
            self.shared.finished.release();
            return;
        }
        let _ = self.commands.send(Command::Close);
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
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

impl<C: Connector> Drop for StreamResource<C> {
    fn drop(&mut self) {
        self.close(CloseCode::GoingAway, "Terminating instance");
        let launch = std::mem::replace(&mut *self.launch.lock(), Launch::Done);
        if let Launch::Running(handle) = launch {
            if !self.shared.finished.wait(self.config.drop_grace) {
                warn!(grace = ?self.config.drop_grace, "close did not finish in time, aborting");
                self.shared.abort.notify_one();
            }
            if handle.join().is_err() {
                error!("I/O thread panicked");
            }
        }
        self.dispatcher.shutdown();
    }
}

/// Work requested before the connection opened.
#[derive(Debug, Default)]
struct Pending {
    queue: VecDeque<OutgoingMessage>,
    pings: usize,
    close: bool,
}

impl Pending {
    fn buffer(&mut self, command: Command) {
        match command {
            Command::Send(_) | Command::Ping if self.close => {
                debug!("dropping write requested after close");
            }
            Command::Send(message) => self.queue.push_back(message),
            Command::Ping => self.pings += 1,
            Command::Close => self.close = true,
        }
    }
}

/// Connect-phase state, moved onto the I/O thread.
struct Pipeline<C: Connector> {
    shared: Arc<Shared>,
    events: EventSink,
    connector: Arc<C>,
    codec: Config,
    url: Url,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
}

impl<C: Connector> Pipeline<C> {
    async fn establish(&self) -> Result<(Reader<C::Stream>, Writer<C::Stream>), ResourceError> {
        let stream = open_transport(self.connector.as_ref(), &self.url).await?;
        let handshake = ClientHandshake::new(
            &self.url,
            &self.protocols,
            self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
        .map_err(|e| ResourceError::new(ErrorType::Handshake, e.to_string()))?;
        let (connection, response) = client_upgrade(stream, &handshake, self.codec.clone())
            .await
            .map_err(|e| ResourceError::new(ErrorType::Handshake, e.to_string()))?;
        debug!(url = %self.url, protocol = ?response.protocol, "handshake complete");
        Ok(connection.split())
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut pending = Pending::default();
        let outcome = {
            let establish = self.establish();
            tokio::pin!(establish);
            loop {
                tokio::select! {
                    outcome = &mut establish => break outcome,
                    Some(command) = commands.recv() => pending.buffer(command),
                    () = self.shared.abort.notified() => {
                        debug!("aborted while connecting");
                        return;
                    }
                }
            }
        };

        let (reader, writer) = match outcome {
            Ok(halves) => halves,
            Err(e) => {
                debug!(error = %e, dropped = pending.queue.len(), "connect failed");
                self.events.error(e);
                self.shared.state.advance(ReadyState::Closed);
                return;
            }
        };

        self.shared.state.advance(ReadyState::Open);
        self.events.connected();

        let (completions_tx, completions) = mpsc::unbounded_channel();
        let mut session = Session {
            shared: self.shared.clone(),
            events: self.events.clone(),
            queue: pending.queue,
            pings: pending.pings,
            pongs: VecDeque::new(),
            close: CloseProgress::NotRequested,
            peer_closed: false,
            echo: None,
            writer: Some(writer),
            reading: false,
            finished: false,
            completions: completions_tx,
        };
        session.start_read(reader);
        if pending.close {
            session.begin_close();
        } else {
            session.pump();
        }
        session.run(commands, completions).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseProgress {
    NotRequested,
    /// Waiting for earlier writes to drain.
    Requested,
    Sent,
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Data(usize),
    Ping,
    Pong,
    Close,
}

enum Completion<S> {
    Read(Reader<S>, crate::Result<Message>),
    Wrote(Writer<S>, WriteKind, crate::Result<()>),
}

/// Open-phase state. Lives on the I/O thread only.
struct Session<S> {
    shared: Arc<Shared>,
    events: EventSink,
    queue: VecDeque<OutgoingMessage>,
    pings: usize,
    pongs: VecDeque<Vec<u8>>,
    close: CloseProgress,
    peer_closed: bool,
    /// Peer close frame to send back, when the peer closed first.
    echo: Option<Option<CloseFrame>>,
    /// `Some` while no write is in flight.
    writer: Option<Writer<S>>,
    reading: bool,
    finished: bool,
    completions: mpsc::UnboundedSender<Completion<S>>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion<S>>,
    ) {
        let shared = self.shared.clone();
        while !self.finished {
            tokio::select! {
                Some(done) = completions.recv() => self.on_completion(done),
                Some(command) = commands.recv() => self.on_command(command),
                () = shared.abort.notified() => {
                    debug!("aborted");
                    break;
                }
            }
        }
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown())
                .await
                .is_err()
            {
                trace!("stream shutdown timed out");
            }
        }
    }

    fn accepting_data(&self) -> bool {
        self.close == CloseProgress::NotRequested && !self.peer_closed
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(message) if self.accepting_data() => {
                self.queue.push_back(message);
                self.pump();
            }
            Command::Send(_) => debug!("dropping message sent after close"),
            Command::Ping if self.accepting_data() => {
                self.pings += 1;
                self.pump();
            }
            Command::Ping => trace!("ignoring ping after close"),
            Command::Close => self.begin_close(),
        }
    }

    fn begin_close(&mut self) {
        if self.close != CloseProgress::NotRequested || self.finished {
            return;
        }
        debug!(queued = self.queue.len(), "closing");
        self.close = CloseProgress::Requested;
        self.shared.state.advance(ReadyState::Closing);
        self.pump();
    }

    fn close_message(&self) -> Message {
        if let Some(frame) = &self.echo {
            return Message::Close(frame.clone());
        }
        let Some((code, reason)) = self.shared.close_request.get() else {
            debug_assert!(false, "close frame without a recorded request");
            return Message::Close(None);
        };
        match code.wire_code() {
            Some(wire) => Message::Close(Some(CloseFrame::new(
                message::CloseCode::from_u16(wire),
                reason.clone(),
            ))),
            None => Message::Close(None),
        }
    }

    fn next_write(&mut self) -> Option<(Message, WriteKind)> {
        if let Some(payload) = self.pongs.pop_front() {
            return Some((Message::Pong(payload), WriteKind::Pong));
        }
        if self.close == CloseProgress::Sent {
            return None;
        }
        if !self.peer_closed {
            while let Some(outgoing) = self.queue.pop_front() {
                if !outgoing.is_binary {
                    let bytes = outgoing.payload.len();
                    return Some((Message::Text(outgoing.payload), WriteKind::Data(bytes)));
                }
                match decode_base64(&outgoing.payload) {
                    Ok(data) => {
                        let bytes = data.len();
                        return Some((Message::Binary(data), WriteKind::Data(bytes)));
                    }
                    Err(e) => self
                        .events
                        .error(ResourceError::new(ErrorType::Send, e.to_string())),
                }
            }
            if self.pings > 0 {
                self.pings -= 1;
                return Some((Message::Ping(Vec::new()), WriteKind::Ping));
            }
        }
        if self.close == CloseProgress::Requested {
            self.close = CloseProgress::Sent;
            return Some((self.close_message(), WriteKind::Close));
        }
        None
    }

    /// Start the next write if the writer is idle.
    fn pump(&mut self) {
        if self.finished || self.writer.is_none() {
            return;
        }
        let Some((message, kind)) = self.next_write() else {
            return;
        };
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        trace!(?kind, "write started");
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = writer.send(&message).await;
            let _ = tx.send(Completion::Wrote(writer, kind, result));
        });
    }

    fn start_read(&mut self, mut reader: Reader<S>) {
        self.reading = true;
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = reader.recv().await;
            let _ = tx.send(Completion::Read(reader, result));
        });
    }

    fn on_completion(&mut self, done: Completion<S>) {
        match done {
            Completion::Wrote(writer, kind, result) => {
                self.writer = Some(writer);
                self.on_written(kind, result);
            }
            Completion::Read(reader, result) => {
                self.reading = false;
                self.on_read(reader, result);
            }
        }
    }

    fn on_written(&mut self, kind: WriteKind, result: crate::Result<()>) {
        match (kind, result) {
            (WriteKind::Data(bytes), Ok(())) => {
                trace!(bytes, "message written");
                self.events.sent(bytes);
            }
            (WriteKind::Data(_), Err(e)) => self
                .events
                .error(ResourceError::new(ErrorType::Send, e.to_string())),
            (WriteKind::Ping, Ok(())) => self.events.pinged(),
            (WriteKind::Ping, Err(e)) => self
                .events
                .error(ResourceError::new(ErrorType::Ping, e.to_string())),
            (WriteKind::Pong, Ok(())) => trace!("pong written"),
            (WriteKind::Pong, Err(e)) => debug!(error = %e, "pong failed"),
            (WriteKind::Close, Ok(())) => {
                debug!("close frame written");
                if self.peer_closed || !self.reading {
                    self.finish();
                    return;
                }
            }
            (WriteKind::Close, Err(e)) => {
                self.events
                    .error(ResourceError::new(ErrorType::Close, e.to_string()));
                self.finish();
                return;
            }
        }
        self.pump();
    }

    fn on_read(&mut self, reader: Reader<S>, result: crate::Result<Message>) {
        match result {
            Ok(Message::Text(text)) => {
                if self.accepting_data() {
                    self.events.message(text.len(), text, false);
                } else {
                    trace!("discarding text received while closing");
                }
                self.start_read(reader);
            }
            Ok(Message::Binary(data)) => {
                if self.accepting_data() {
                    self.events.message(data.len(), encode_base64(&data), true);
                } else {
                    trace!("discarding binary received while closing");
                }
                self.start_read(reader);
            }
            Ok(Message::Ping(payload)) => {
                self.pongs.push_back(payload);
                self.pump();
                self.start_read(reader);
            }
            Ok(Message::Close(frame)) => self.on_peer_close(frame),
            Ok(_) => self.start_read(reader),
            Err(e) => self.on_read_error(e),
        }
    }

    fn on_peer_close(&mut self, frame: Option<CloseFrame>) {
        if self.close == CloseProgress::NotRequested {
            self.echo = Some(frame.clone());
        }
        let (code, reason) = match frame {
            Some(frame) => (CloseCode::from(frame.code), frame.reason),
            None => (CloseCode::NoStatus, String::new()),
        };
        debug!(%code, "peer sent close");
        self.peer_closed = true;
        let _ = self.shared.close_request.set((code, reason));
        if self.close == CloseProgress::Sent {
            self.finish();
            return;
        }
        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "peer closed with messages queued");
        }
        self.queue.clear();
        self.pings = 0;
        self.close = CloseProgress::Requested;
        self.shared.state.advance(ReadyState::Closing);
        self.pump();
    }

    fn on_read_error(&mut self, e: Error) {
        if self.close == CloseProgress::Sent && e.is_transport_closed() {
            debug!("transport closed after close frame");
            self.finish();
            return;
        }
        self.events
            .error(ResourceError::new(ErrorType::Receive, e.to_string()));
        if e.is_transport_closed() {
            warn!(error = %e, "transport terminated unexpectedly");
            let _ = self.shared.close_request.set((
                CloseCode::BadPayload,
                format!("Underlying connection terminated: {e}"),
            ));
            self.finish();
            return;
        }
        let _ = self
            .shared
            .close_request
            .set((CloseCode::ProtocolError, e.to_string()));
        match self.close {
            CloseProgress::Sent => self.finish(),
            _ => {
                self.queue.clear();
                self.pings = 0;
                self.close = CloseProgress::Requested;
                self.shared.state.advance(ReadyState::Closing);
                self.pump();
            }
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.state.advance(ReadyState::Closed);
        let (code, reason) = self
            .shared
            .close_request
            .get()
            .cloned()
            .unwrap_or((CloseCode::Abnormal, String::new()));
        debug!(%code, reason = %reason, "closed");
        self.events.closed(code, reason);
    }
}

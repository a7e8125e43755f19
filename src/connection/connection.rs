use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use bytes::BytesMut;

use crate::codec::{FrameReader, FrameWriter, WebSocketCodec};
use crate::config::{Config, Limits};
use crate::connection::fragmenter::Fragments;
use crate::connection::{ReadyState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::assembler::{AssembledMessage, MessageAssembler};
use crate::protocol::{Frame, OpCode};

/// Turns validated frames into messages. Control frames come through as
/// they arrive; data frames are held until their message is complete.
#[derive(Debug)]
struct Inbound {
    assembler: MessageAssembler,
}

impl Inbound {
    fn new(limits: Limits) -> Self {
        Self {
            assembler: MessageAssembler::new(limits),
        }
    }

    fn accept(&mut self, frame: Frame) -> Result<Option<Message>> {
        frame.validate()?;
        match frame.opcode {
            OpCode::Ping => Ok(Some(Message::Ping(frame.into_payload()))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.into_payload()))),
            OpCode::Close => Ok(Some(Message::Close(CloseFrame::from_payload(
                frame.payload(),
            )))),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                self.assembler.push(frame)?.map(into_message).transpose()
            }
        }
    }
}

fn into_message(assembled: AssembledMessage) -> Result<Message> {
    match assembled.opcode {
        OpCode::Text => Ok(Message::Text(String::from_utf8(assembled.payload)?)),
        OpCode::Binary => Ok(Message::Binary(assembled.payload)),
        other => Err(Error::ProtocolViolation(format!(
            "assembled message with opcode {other}"
        ))),
    }
}

/// Frames for one outgoing message. Data messages are checked against the
/// message limit and fragmented; control messages are a single frame.
fn outbound_frames(message: &Message, config: &Config) -> Result<Vec<Frame>> {
    let opcode = match message {
        Message::Text(_) => OpCode::Text,
        Message::Binary(_) => OpCode::Binary,
        control => return Ok(vec![Frame::from(control.clone())]),
    };
    let payload = message.payload();
    config.limits.check_message_size(payload.len())?;
    Ok(Fragments::new(payload, opcode, config.fragment_size).collect())
}

/// Message-level connection over a stream whose handshake is complete.
///
/// `recv` answers pings and echoes close frames on its own, which is what a
/// simple peer wants. Use [`Connection::split`] to drive reads and writes
/// from separate tasks; the halves leave those replies to the caller.
#[derive(Debug)]
pub struct Connection<T> {
    codec: WebSocketCodec<T>,
    inbound: Inbound,
    state: ReadyState,
}

impl<T> Connection<T> {
    /// Wrap a stream that has completed its handshake.
    #[must_use]
    pub fn new(io: T, role: Role, config: Config) -> Self {
        Self::with_buffered(io, role, config, BytesMut::new())
    }

    /// Wrap a stream together with bytes read past the end of the
    /// handshake.
    #[must_use]
    pub fn with_buffered(io: T, role: Role, config: Config, buffered: BytesMut) -> Self {
        Self {
            inbound: Inbound::new(config.limits.clone()),
            codec: WebSocketCodec::with_buffered(io, role, config, buffered),
            state: ReadyState::Open,
        }
    }

    /// Where the close handshake stands.
    #[must_use]
    pub fn state(&self) -> ReadyState {
        self.state
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Send a message. Sending a close message starts the close handshake.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` once a close frame has gone out, limit
    /// errors for oversized data, and I/O errors.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::ConnectionClosed(None));
        }
        if matches!(message, Message::Close(_)) {
            self.state = ReadyState::Closing;
        }
        for frame in outbound_frames(&message, self.codec.config())? {
            self.codec.write_frame(&frame).await?;
        }
        self.codec.flush().await
    }

    /// Send a close frame with `code` and `reason`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCloseCode` for codes that may not go on the wire, plus
    /// the errors of [`Connection::send`].
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if code.is_reserved() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        self.send(Message::close(code, reason)).await
    }

    /// Receive the next message. Pings are answered and a peer close is
    /// echoed before being returned. `Ok(None)` means the stream has ended.
    ///
    /// # Errors
    ///
    /// Protocol violations and I/O errors.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if self.state.is_closed() {
            return Ok(None);
        }
        loop {
            let frame = match self.codec.read_frame().await {
                Ok(frame) => frame,
                Err(Error::ConnectionClosed(_)) => {
                    self.state = ReadyState::Closed;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            let Some(message) = self.inbound.accept(frame)? else {
                continue;
            };
            match &message {
                Message::Ping(data) if self.state.can_send() => {
                    self.codec.write_frame(&Frame::pong(data.clone())).await?;
                    self.codec.flush().await?;
                }
                Message::Close(frame) => {
                    if self.state.can_send() {
                        let code = frame.as_ref().map(|f| f.code.as_u16());
                        let reason = frame.as_ref().map_or("", |f| f.reason.as_str());
                        self.codec.write_frame(&Frame::close(code, reason)).await?;
                        self.codec.flush().await?;
                    }
                    self.state = ReadyState::Closed;
                }
                _ => {}
            }
            return Ok(Some(message));
        }
    }

    /// Separate into read and write halves.
    #[must_use]
    pub fn split(self) -> (ConnectionReader<ReadHalf<T>>, ConnectionWriter<WriteHalf<T>>) {
        let config = self.codec.config().clone();
        let (reader, writer) = self.codec.split();
        (
            ConnectionReader {
                frames: reader,
                inbound: self.inbound,
            },
            ConnectionWriter {
                frames: writer,
                config,
            },
        )
    }
}

/// Read half of a split [`Connection`].
#[derive(Debug)]
pub struct ConnectionReader<R> {
    frames: FrameReader<R>,
    inbound: Inbound,
}

impl<R: AsyncRead + Unpin> ConnectionReader<R> {
    /// Next complete message, control messages included. Nothing is sent
    /// in response.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed(None)` when the stream ends, protocol
    /// violations, and I/O errors.
    pub async fn recv(&mut self) -> Result<Message> {
        loop {
            let frame = self.frames.read_frame().await?;
            if let Some(message) = self.inbound.accept(frame)? {
                return Ok(message);
            }
        }
    }
}

/// Write half of a split [`Connection`].
#[derive(Debug)]
pub struct ConnectionWriter<W> {
    frames: FrameWriter<W>,
    config: Config,
}

impl<W: AsyncWrite + Unpin> ConnectionWriter<W> {
    /// Write and flush one message, fragmenting data as configured.
    ///
    /// # Errors
    ///
    /// Limit errors for oversized data and I/O errors.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        for frame in outbound_frames(message, &self.config)? {
            self.frames.write_frame(&frame).await?;
        }
        self.frames.flush().await
    }

    /// Write a close frame. `None` sends an empty payload.
    ///
    /// # Errors
    ///
    /// I/O errors.
    pub async fn send_close(&mut self, code: Option<u16>, reason: &str) -> Result<()> {
        self.frames.write_frame(&Frame::close(code, reason)).await?;
        self.frames.flush().await
    }

    /// Shut down the write direction of the stream.
    ///
    /// # Errors
    ///
    /// I/O errors.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.frames.shutdown().await
    }
}

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::config::Config;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;
use crate::protocol::validation::FrameValidator;
use crate::protocol::Frame;

/// Seed for mask generation; falls back to the clock if the OS source fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
            .unwrap_or(0x5EED_CAFE)
    }
}

/// Inbound half of the codec state: buffered bytes plus header checks.
#[derive(Debug)]
struct ReadState {
    buf: BytesMut,
    validator: FrameValidator,
}

impl ReadState {
    fn new(role: Role, config: &Config, buffered: BytesMut) -> Self {
        let mut buf = buffered;
        buf.reserve(config.read_buffer_size);
        Self {
            buf,
            validator: FrameValidator::new(role, config.limits.clone())
                .with_accept_unmasked(config.accept_unmasked_frames),
        }
    }

    /// Pop a complete frame off the buffer, if one is there.
    fn decode(&mut self) -> Result<Option<Frame>> {
        let header = match FrameHeader::parse(&self.buf) {
            Ok(header) => header,
            Err(Error::IncompleteFrame { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.validator.check(&header)?;
        match Frame::parse(&self.buf) {
            Ok((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            Err(Error::IncompleteFrame { needed }) => {
                self.buf.reserve(needed);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_frame<R: AsyncRead + Unpin>(&mut self, io: &mut R) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decode()? {
                return Ok(frame);
            }
            if io.read_buf(&mut self.buf).await? == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Outbound half of the codec state: scratch buffer and mask generator.
#[derive(Debug)]
struct WriteState {
    buf: BytesMut,
    mask: bool,
    mask_counter: u32,
}

impl WriteState {
    fn new(role: Role, config: &Config) -> Self {
        Self {
            buf: BytesMut::with_capacity(config.write_buffer_size),
            mask: role.must_mask() || config.mask_frames,
            mask_counter: random_mask_seed(),
        }
    }

    fn next_mask(&mut self) -> [u8; 4] {
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let mut x = self.mask_counter;
        x = (x ^ (x >> 16)).wrapping_mul(0x85EB_CA6B);
        x = (x ^ (x >> 13)).wrapping_mul(0xC2B2_AE35);
        (x ^ (x >> 16)).to_le_bytes()
    }

    async fn write_frame<W: AsyncWrite + Unpin>(&mut self, io: &mut W, frame: &Frame) -> Result<()> {
        let mask = self.mask.then(|| self.next_mask());
        self.buf.clear();
        frame.encode(&mut self.buf, mask);
        io.write_all(&self.buf).await?;
        Ok(())
    }
}

/// Frame-level codec over a full-duplex stream.
#[derive(Debug)]
pub struct WebSocketCodec<T> {
    io: T,
    read: ReadState,
    write: WriteState,
    config: Config,
}

impl<T> WebSocketCodec<T> {
    /// Wrap a stream whose handshake has completed.
    #[must_use]
    pub fn new(io: T, role: Role, config: Config) -> Self {
        Self::with_buffered(io, role, config, BytesMut::new())
    }

    /// Wrap a stream, seeding the read buffer with bytes that arrived
    /// together with the handshake response.
    #[must_use]
    pub fn with_buffered(io: T, role: Role, config: Config, buffered: BytesMut) -> Self {
        Self {
            read: ReadState::new(role, &config, buffered),
            write: WriteState::new(role, &config),
            io,
            config,
        }
    }

    /// Codec configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketCodec<T> {
    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed(None)` at EOF, I/O errors, and header or
    /// framing violations.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.read.read_frame(&mut self.io).await
    }

    /// Write one frame, masking it for the client role.
    ///
    /// # Errors
    ///
    /// I/O errors from the stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write.write_frame(&mut self.io, frame).await
    }

    /// Flush the stream.
    ///
    /// # Errors
    ///
    /// I/O errors from the stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Separate the read and write sides so each can run in its own task.
    #[must_use]
    pub fn split(self) -> (FrameReader<ReadHalf<T>>, FrameWriter<WriteHalf<T>>) {
        let (r, w) = tokio::io::split(self.io);
        (
            FrameReader {
                io: r,
                state: self.read,
            },
            FrameWriter {
                io: w,
                state: self.write,
            },
        )
    }
}

/// Read side of a split codec.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    state: ReadState,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// See [`WebSocketCodec::read_frame`].
    pub async fn read_frame(&mut self) -> Result<Frame> {
        self.state.read_frame(&mut self.io).await
    }
}

/// Write side of a split codec.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    state: WriteState,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Write one frame without flushing.
    ///
    /// # Errors
    ///
    /// I/O errors from the stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.state.write_frame(&mut self.io, frame).await
    }

    /// Flush the stream.
    ///
    /// # Errors
    ///
    /// I/O errors from the stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write direction (TLS close_notify / TCP FIN).
    ///
    /// # Errors
    ///
    /// I/O errors from the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

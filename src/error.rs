//! Error types for the WebSocket client stack.
//!
//! Two layers of errors live here:
//!
//! - [`Error`] is returned by the protocol, codec, transport and factory
//!   layers through the usual `Result` plumbing.
//! - [`ResourceError`] is what a [`WebSocketResource`](crate::WebSocketResource)
//!   hands to its error handler. Resources never return errors from their
//!   public operations; every failure is classified with an [`ErrorType`]
//!   and delivered asynchronously instead.

use std::fmt;

use thiserror::Error;

/// Result type alias for protocol and transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur below the resource layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in text frame or string conversion.
    #[error("Invalid UTF-8")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// A declared payload length does not fit in `usize`.
    #[error("Payload too large for platform: {size} bytes (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared payload size.
        size: u64,
        /// Largest addressable size.
        max: u64,
    },

    /// The peer closed the stream. `None` means the transport ended without
    /// a close frame.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The handshake response exceeded the configured size limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A header value cannot be placed on the wire.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection string does not match `scheme://host[:port][/path][?query]`.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Caller supplied an argument the operation cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Binary payload is not valid Base64.
    #[error("Invalid Base64: {0}")]
    InvalidBase64(String),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Unmasked client frame (security violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),
}

impl Error {
    /// Returns `true` when the error means the underlying transport is gone
    /// (reset, broken pipe, or EOF without a close frame) rather than a
    /// protocol-level fault on a live stream.
    #[must_use]
    pub const fn is_transport_closed(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed(None))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8
    }
}

/// Pipeline stage a [`ResourceError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Host name could not be resolved.
    Resolution,
    /// TCP or TLS connection could not be established.
    Connection,
    /// The HTTP upgrade was rejected or malformed.
    Handshake,
    /// A ping frame could not be written.
    Ping,
    /// An outbound message could not be encoded or written.
    Send,
    /// An inbound read failed.
    Receive,
    /// The close handshake failed.
    Close,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorType::Resolution => write!(f, "Resolution"),
            ErrorType::Connection => write!(f, "Connection"),
            ErrorType::Handshake => write!(f, "Handshake"),
            ErrorType::Ping => write!(f, "Ping"),
            ErrorType::Send => write!(f, "Send"),
            ErrorType::Receive => write!(f, "Receive"),
            ErrorType::Close => write!(f, "Close"),
        }
    }
}

/// A failure reported through a resource's error handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{kind}] {message}")]
pub struct ResourceError {
    /// Human-readable description.
    pub message: String,
    /// Stage that failed.
    pub kind: ErrorType,
}

impl ResourceError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

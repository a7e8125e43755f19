//! Configuration for the protocol codec and for resources.
//!
//! [`Config`] and [`Limits`] tune the in-crate RFC 6455 stack used by the
//! stream backend. [`ResourceConfig`] is what the
//! [`ResourceFactory`](crate::ResourceFactory) consumes: which backend to
//! build, whether to relax certificate checks, and how long a dropped
//! resource may spend on its farewell close.

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Environment variable selecting the backend (`stream` or `message-socket`).
pub const BACKEND_ENV: &str = "WS_BRIDGE_BACKEND";

/// Environment variable enabling the certificate exceptions.
pub const ACCEPT_INVALID_CERTS_ENV: &str = "WS_BRIDGE_ACCEPT_INVALID_CERTS";

/// Size bounds enforced by the stream backend while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest accepted frame payload. Default: 16 MB
    pub max_frame_size: usize,
    /// Largest reassembled message. Default: 64 MB
    pub max_message_size: usize,
    /// Most fragments one message may arrive in. Default: 128
    pub max_fragment_count: usize,
    /// Largest server handshake response. Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), Error> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), Error> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Settings for the in-crate frame codec.
#[derive(Debug, Clone)]
pub struct Config {
    pub limits: Limits,
    /// Data messages longer than this go out as several frames. Default: 16 KB
    pub fragment_size: usize,
    /// Let a server-role codec read unmasked frames. Default: false
    pub accept_unmasked_frames: bool,
    /// Mask outgoing frames, as every client must. Default: true
    pub mask_frames: bool,
    /// Starting capacity of the read buffer. Default: 8 KB
    pub read_buffer_size: usize,
    /// Starting capacity of the write buffer. Default: 8 KB
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            accept_unmasked_frames: false,
            mask_frames: true,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the size limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the outgoing fragment size.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Server role: frames go out unmasked and unmasked input is refused.
    #[must_use]
    pub fn server() -> Self {
        Self {
            mask_frames: false,
            accept_unmasked_frames: false,
            ..Default::default()
        }
    }

    /// Client role: every outgoing frame is masked.
    #[must_use]
    pub fn client() -> Self {
        Self {
            mask_frames: true,
            accept_unmasked_frames: false,
            ..Default::default()
        }
    }
}

/// Which concrete resource implementation the factory builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// In-crate RFC 6455 stack driven by a dedicated event-loop thread.
    #[default]
    Stream,
    /// `tokio-tungstenite` socket driven by a queued sequencer on a shared runtime.
    MessageSocket,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Backend::Stream),
            "message-socket" | "message_socket" | "messagesocket" => Ok(Backend::MessageSocket),
            other => Err(Error::InvalidArgument(format!("unknown backend: {other}"))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Stream => write!(f, "stream"),
            Backend::MessageSocket => write!(f, "message-socket"),
        }
    }
}

/// Settings applied to every resource a factory creates.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Backend selection.
    pub backend: Backend,

    /// Ignore "unknown issuer" and "name mismatch" certificate errors on
    /// `wss` connections. All other certificate errors still fail.
    ///
    /// Default: false
    pub accept_invalid_certificates: bool,

    /// Codec settings for the stream backend. The message-socket backend
    /// takes its size limits from here as well.
    pub codec: Config,

    /// Upper bound on how long dropping a resource waits for the farewell
    /// close to finish before tearing the connection down.
    ///
    /// Default: 5 seconds
    pub drop_grace: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            accept_invalid_certificates: false,
            codec: Config::client(),
            drop_grace: Duration::from_secs(5),
        }
    }
}

impl ResourceConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `WS_BRIDGE_BACKEND` and `WS_BRIDGE_ACCEPT_INVALID_CERTS`,
    /// falling back to defaults for unset or unrecognized values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup(BACKEND_ENV) {
            match value.parse() {
                Ok(backend) => config.backend = backend,
                Err(e) => tracing::warn!(error = %e, "ignoring {BACKEND_ENV}"),
            }
        }
        if let Some(value) = lookup(ACCEPT_INVALID_CERTS_ENV) {
            config.accept_invalid_certificates = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        config
    }

    /// Select the backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Toggle the certificate exceptions.
    #[must_use]
    pub const fn with_accept_invalid_certificates(mut self, accept: bool) -> Self {
        self.accept_invalid_certificates = accept;
        self
    }

    /// Set codec configuration.
    #[must_use]
    pub fn with_codec(mut self, codec: Config) -> Self {
        self.codec = codec;
        self
    }

    /// Set the drop grace period.
    #[must_use]
    pub const fn with_drop_grace(mut self, grace: Duration) -> Self {
        self.drop_grace = grace;
        self
    }
}

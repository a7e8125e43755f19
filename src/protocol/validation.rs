//! Header checks applied before a frame's payload is buffered.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Rejects frames that break masking, RSV or size rules for a given role.
///
/// Running this on the header lets the codec refuse an oversized frame
/// before reading its payload.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
}

impl FrameValidator {
    /// Create a validator for frames received by `role`.
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
        }
    }

    /// Let a server accept unmasked client frames.
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Validate a decoded header.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` when a server receives an unmasked frame
    /// - `Error::MaskedServerFrame` when a client receives a masked frame
    /// - `Error::ReservedBitsSet` when any RSV bit is set
    /// - `Error::FrameTooLarge` when the payload exceeds `max_frame_size`
    pub fn check(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                return Err(Error::UnmaskedClientFrame);
            }
            Role::Client if masked => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        if header.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        self.limits.check_frame_size(header.payload_len)
    }
}

//! Reassembly of fragmented data messages.

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// A complete text or binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// `Text` or `Binary`.
    pub opcode: OpCode,
    /// Concatenated fragment payloads.
    pub payload: Vec<u8>,
}

/// Collects data frames until FIN, enforcing message limits and validating
/// text incrementally.
#[derive(Debug)]
pub struct MessageAssembler {
    limits: Limits,
    opcode: Option<OpCode>,
    buffer: BytesMut,
    fragments: usize,
    utf8: Utf8Validator,
}

impl MessageAssembler {
    /// Create an idle assembler.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            opcode: None,
            buffer: BytesMut::new(),
            fragments: 0,
            utf8: Utf8Validator::new(),
        }
    }

    /// Add a data frame. Returns the message once its final fragment arrives.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with nothing to
    ///   continue, a new message interleaved into an unfinished one, or a
    ///   control frame
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` when limits are hit
    /// - `Error::InvalidUtf8` for malformed text
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Continuation, Some(current)) => current,
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
            (OpCode::Text | OpCode::Binary, None) => frame.opcode,
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "new data frame before previous message finished".into(),
                ));
            }
            (control, _) => {
                return Err(Error::ProtocolViolation(format!(
                    "{control} frame passed to message assembler"
                )));
            }
        };

        self.limits.check_fragment_count(self.fragments + 1)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;
        if opcode == OpCode::Text {
            self.utf8.feed(frame.payload(), frame.fin)?;
        }

        if frame.fin && self.opcode.is_none() {
            // Unfragmented message: hand the payload through untouched.
            return Ok(Some(AssembledMessage {
                opcode,
                payload: frame.into_payload(),
            }));
        }

        self.opcode = Some(opcode);
        self.fragments += 1;
        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        self.reset();
        Ok(Some(AssembledMessage { opcode, payload }))
    }

    /// `true` while a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.opcode = None;
        self.buffer.clear();
        self.fragments = 0;
        self.utf8 = Utf8Validator::new();
    }
}

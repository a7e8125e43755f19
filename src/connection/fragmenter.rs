//! Splitting outgoing messages into frames.

use crate::protocol::{Frame, OpCode};

/// Frames for one outgoing data message.
///
/// Payloads larger than `fragment_size` become a first frame carrying the
/// message opcode followed by continuation frames; only the last has FIN
/// set. An empty payload still yields a single frame.
#[derive(Debug)]
pub struct Fragments<'a> {
    chunks: std::iter::Peekable<std::slice::Chunks<'a, u8>>,
    opcode: OpCode,
    started: bool,
}

impl<'a> Fragments<'a> {
    /// Fragment `payload`; a `fragment_size` of zero is treated as one.
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            chunks: payload.chunks(fragment_size.max(1)).peekable(),
            opcode,
            started: false,
        }
    }
}

impl Iterator for Fragments<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let opcode = if self.started {
            OpCode::Continuation
        } else {
            self.opcode
        };
        match self.chunks.next() {
            Some(chunk) => {
                self.started = true;
                let fin = self.chunks.peek().is_none();
                Some(Frame::new(fin, opcode, chunk.to_vec()))
            }
            None if !self.started => {
                self.started = true;
                Some(Frame::new(true, opcode, Vec::new()))
            }
            None => None,
        }
    }
}

//! Frame parsing and serialization (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking key (if MASK set)     |          Payload          |
//! +-----------------------------------+---------------------------+
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Longest close reason that fits next to the two-byte status code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

/// Longest prefix of `reason` that fits in a close frame, cut at a
/// character boundary.
#[must_use]
pub fn truncate_close_reason(reason: &str) -> &str {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Decoded fixed part of a frame, available before the payload arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1..RSV3 packed into the low three bits.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, if the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
    /// Bytes occupied by the header including extended length and mask.
    pub header_len: usize,
}

impl FrameHeader {
    /// Decode a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` ends inside the header
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode` for unknown opcodes
    /// - `Error::PayloadTooLargeForPlatform` if the 64-bit length does not fit `usize`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let [b0, b1, rest @ ..] = buf else {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        };

        let (payload_len, ext_len) = match b1 & 0x7F {
            126 => {
                let ext: [u8; 2] = read_ext(rest)?;
                (u64::from(u16::from_be_bytes(ext)), 2)
            }
            127 => {
                let ext: [u8; 8] = read_ext(rest)?;
                (u64::from_be_bytes(ext), 8)
            }
            short => (u64::from(short), 0),
        };
        let payload_len =
            usize::try_from(payload_len).map_err(|_| Error::PayloadTooLargeForPlatform {
                size: payload_len,
                max: usize::MAX as u64,
            })?;

        // The extended length was read successfully, so `rest` holds at least `ext_len` bytes.
        let mask = if b1 & 0x80 != 0 {
            Some(read_ext::<4>(&rest[ext_len..])?)
        } else {
            None
        };

        Ok(Self {
            fin: b0 & 0x80 != 0,
            rsv: (b0 >> 4) & 0x07,
            opcode: OpCode::from_u8(b0 & 0x0F)?,
            mask,
            payload_len,
            header_len: 2 + ext_len + if mask.is_some() { 4 } else { 0 },
        })
    }

    /// Header plus payload, or `None` on overflow.
    #[must_use]
    pub fn frame_len(&self) -> Option<usize> {
        self.header_len.checked_add(self.payload_len)
    }
}

fn read_ext<const N: usize>(rest: &[u8]) -> Result<[u8; N]> {
    rest.get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::IncompleteFrame {
            needed: N - rest.len().min(N),
        })
}

/// A single WebSocket frame with an unmasked payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1..RSV3 packed into the low three bits. Always zero for frames
    /// built by this crate.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            payload,
        }
    }

    /// Single-frame text message.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Single-frame binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Close frame. The reason is cut at a character boundary so the payload
    /// stays within the control-frame limit; without a code the payload is
    /// empty.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let reason = truncate_close_reason(reason);
                let mut data = Vec::with_capacity(2 + reason.len());
                data.extend_from_slice(&code.to_be_bytes());
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse one frame from the front of `buf`, unmasking its payload.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` until the whole frame is buffered, plus any
    /// error from [`FrameHeader::parse`].
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len().ok_or(Error::PayloadTooLargeForPlatform {
            size: header.payload_len as u64,
            max: usize::MAX as u64,
        })?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok((
            Self {
                fin: header.fin,
                rsv: header.rsv,
                opcode: header.opcode,
                payload,
            },
            total,
        ))
    }

    /// Check RFC 6455 structural rules.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let ext = match self.payload.len() {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + ext + if masked { 4 } else { 0 } + self.payload.len()
    }

    /// Append the serialized frame to `dst`, masking the payload when a key
    /// is supplied.
    pub fn encode(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        dst.reserve(self.wire_size(mask.is_some()));

        let fin = if self.fin { 0x80 } else { 0 };
        dst.put_u8(fin | ((self.rsv & 0x07) << 4) | self.opcode.as_u8());

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();
        match len {
            0..=125 => dst.put_u8(mask_bit | len as u8),
            126..=0xFFFF => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len as u64);
            }
        }

        let start = match mask {
            Some(key) => {
                dst.put_slice(&key);
                dst.len()
            }
            None => dst.len(),
        };
        dst.put_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(&mut dst[start..], key);
        }
    }
}

impl From<crate::message::Message> for Frame {
    fn from(message: crate::message::Message) -> Self {
        use crate::message::Message;
        match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(Some(close)) => Frame::close(Some(close.code.as_u16()), &close.reason),
            Message::Close(None) => Frame::close(None, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ----- Parsing ------------------------------------------------------------

    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = [0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert_eq!(frame.rsv, 0);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame() {
        let data = [
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // masked "Hello"
        ];
        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_extended_16bit_length() {
        let mut data = vec![0x82, 126, 0x01, 0x00];
        data.extend(std::iter::repeat_n(0xAB, 256));
        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 260);
        assert_eq!(frame.payload().len(), 256);
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(
            Frame::parse(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x05, b'H']),
            Err(Error::IncompleteFrame { needed: 4 })
        );
        assert!(matches!(
            Frame::parse(&[0x82, 126, 0x01]),
            Err(Error::IncompleteFrame { .. })
        ));
        assert!(matches!(
            Frame::parse(&[0x81, 0x85, 0x37]),
            Err(Error::IncompleteFrame { needed: 3 })
        ));
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert_eq!(Frame::parse(&[0x83, 0x00]), Err(Error::ReservedOpcode(0x3)));
    }

    #[test]
    fn test_parse_reports_rsv_bits() {
        let (frame, _) = Frame::parse(&[0xC1, 0x00]).unwrap();
        assert_eq!(frame.rsv, 0b100);
        assert_eq!(frame.validate(), Err(Error::ReservedBitsSet));
    }

    // ----- Validation ---------------------------------------------------------

    #[test]
    fn test_validate_control_frames() {
        let mut ping = Frame::ping(vec![0; 10]);
        assert!(ping.validate().is_ok());
        ping.fin = false;
        assert_eq!(ping.validate(), Err(Error::FragmentedControlFrame));
        assert_eq!(
            Frame::pong(vec![0; 126]).validate(),
            Err(Error::ControlFrameTooLarge(126))
        );
    }

    // ----- Encoding -----------------------------------------------------------

    #[test]
    fn test_encode_unmasked() {
        let mut buf = BytesMut::new();
        Frame::text("Hello").encode(&mut buf, None);
        assert_eq!(&buf[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_encode_masked_matches_rfc() {
        let mut buf = BytesMut::new();
        Frame::text("Hello").encode(&mut buf, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &buf[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_lengths_match_wire_size() {
        for len in [0, 125, 126, 65535, 65536] {
            let frame = Frame::binary(vec![7u8; len]);
            for masked in [false, true] {
                let mut buf = BytesMut::new();
                frame.encode(&mut buf, masked.then_some([1, 2, 3, 4]));
                assert_eq!(buf.len(), frame.wire_size(masked), "len={len} masked={masked}");
                let (parsed, used) = Frame::parse(&buf).unwrap();
                assert_eq!(used, buf.len());
                assert_eq!(parsed, frame);
            }
        }
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(Some(1000), "bye");
        assert_eq!(frame.payload(), &[0x03, 0xe8, b'b', b'y', b'e']);
        assert!(Frame::close(None, "ignored").payload().is_empty());
    }

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let frame = Frame::close(Some(1001), &reason);
        assert!(frame.payload().len() <= MAX_CONTROL_FRAME_PAYLOAD);
        assert!(std::str::from_utf8(&frame.payload()[2..]).is_ok());
        assert!(frame.validate().is_ok());
    }
}

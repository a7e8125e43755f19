//! Incremental UTF-8 validation for fragmented text messages.

use crate::error::{Error, Result};

/// Validates a text message fragment by fragment.
///
/// A multi-byte sequence may straddle a fragment boundary; up to three
/// trailing bytes are carried into the next call.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    carry: [u8; 3],
    carry_len: usize,
}

impl Utf8Validator {
    /// Create a validator with no pending bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            carry: [0; 3],
            carry_len: 0,
        }
    }

    /// Feed the next fragment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` on an invalid sequence, or when `fin` is
    /// set and a sequence is left unfinished.
    pub fn feed(&mut self, mut data: &[u8], fin: bool) -> Result<()> {
        if self.carry_len > 0 {
            // Complete the pending sequence with at most three new bytes.
            let mut joined = [0u8; 6];
            let take = data.len().min(3);
            joined[..self.carry_len].copy_from_slice(&self.carry[..self.carry_len]);
            joined[self.carry_len..self.carry_len + take].copy_from_slice(&data[..take]);
            let joined = &joined[..self.carry_len + take];

            let consumed = match std::str::from_utf8(joined) {
                Ok(_) => joined.len(),
                Err(e) if e.valid_up_to() > 0 => e.valid_up_to(),
                Err(e) if e.error_len().is_none() && take == data.len() && !fin => {
                    self.carry[..joined.len()].copy_from_slice(joined);
                    self.carry_len = joined.len();
                    return Ok(());
                }
                Err(_) => return Err(Error::InvalidUtf8),
            };
            data = &data[consumed - self.carry_len..];
            self.carry_len = 0;
        }

        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !fin => {
                let tail = &data[e.valid_up_to()..];
                self.carry[..tail.len()].copy_from_slice(tail);
                self.carry_len = tail.len();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    /// `true` while a multi-byte sequence is waiting for more bytes.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.carry_len > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_message() {
        let mut v = Utf8Validator::new();
        assert!(v.feed("héllo".as_bytes(), true).is_ok());
        assert!(!v.is_pending());
    }

    #[test]
    fn test_split_sequence_across_fragments() {
        let bytes = "a€b".as_bytes(); // € is three bytes
        for split in 0..=bytes.len() {
            let mut v = Utf8Validator::new();
            v.feed(&bytes[..split], false).unwrap();
            v.feed(&bytes[split..], true).unwrap();
        }
    }

    #[test]
    fn test_sequence_split_over_three_fragments() {
        let bytes = "\u{1F600}".as_bytes();
        let mut v = Utf8Validator::new();
        v.feed(&bytes[..1], false).unwrap();
        v.feed(&bytes[1..2], false).unwrap();
        assert!(v.is_pending());
        v.feed(&bytes[2..], true).unwrap();
    }

    #[test]
    fn test_truncated_final_fragment() {
        let bytes = "€".as_bytes();
        let mut v = Utf8Validator::new();
        v.feed(&bytes[..2], false).unwrap();
        assert_eq!(v.feed(&[], true), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_invalid_bytes() {
        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0x61, 0xFF], false), Err(Error::InvalidUtf8));
        let mut v = Utf8Validator::new();
        v.feed(&[0xE2], false).unwrap();
        assert_eq!(v.feed(&[0x41], true), Err(Error::InvalidUtf8));
    }
}

//! Payload encodings at the resource boundary.
//!
//! The resource API is string based: binary payloads travel as Base64 text
//! and scripting runtimes frequently hand out UTF-16. Everything on the wire
//! is raw bytes or UTF-8.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::error::{Error, Result};

/// Decoder that neither requires nor rejects `=` padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// Encode bytes as padded standard Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard Base64, accepting zero to three trailing `=` characters.
///
/// # Errors
///
/// Returns [`Error::InvalidBase64`] for characters outside the alphabet, an
/// impossible length, or more than three padding characters.
pub fn decode_base64(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');
    if input.len() - trimmed.len() > 3 {
        return Err(Error::InvalidBase64("excess padding".into()));
    }
    LENIENT
        .decode(trimmed)
        .map_err(|e| Error::InvalidBase64(e.to_string()))
}

/// Convert UTF-8 text to UTF-16 code units.
#[must_use]
pub fn utf8_to_utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Convert UTF-16 code units to UTF-8.
///
/// # Errors
///
/// Returns [`Error::InvalidUtf8`] if `units` contains an unpaired surrogate.
pub fn utf16_to_utf8(units: &[u16]) -> Result<String> {
    String::from_utf16(units).map_err(|_| Error::InvalidUtf8)
}

/// Convert UTF-16 code units to UTF-8, replacing unpaired surrogates with
/// U+FFFD.
#[must_use]
pub fn utf16_to_utf8_lossy(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

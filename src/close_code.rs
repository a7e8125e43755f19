//! Close codes reported by resources.
//!
//! [`CloseCode`] is the closed set of RFC 6455 status values a resource
//! accepts from callers and reports to its close handler. Each variant's
//! discriminant is its numeric code. [`CloseCode::to_transport_code`] maps
//! onto the wire-level [`message::CloseCode`]; the block of `const`
//! assertions below fails the build if the two registries ever disagree on
//! a value or if the variants fall out of ascending order.

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;

use crate::message;

/// Close status exposed at the resource boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u16)]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal = 1000,
    /// 1001
    GoingAway = 1001,
    /// 1002
    ProtocolError = 1002,
    /// 1003
    UnknownData = 1003,
    /// 1004
    Reserved1 = 1004,
    /// 1005. Also reported when the peer's code is not in this registry.
    NoStatus = 1005,
    /// 1006
    Abnormal = 1006,
    /// 1007. Used when the transport dies under an open connection.
    BadPayload = 1007,
    /// 1008
    PolicyError = 1008,
    /// 1009
    TooBig = 1009,
    /// 1010
    NeedsExtension = 1010,
    /// 1011
    InternalError = 1011,
    /// 1012
    ServiceRestart = 1012,
    /// 1013
    TryAgainLater = 1013,
    /// 1014
    Reserved2 = 1014,
    /// 1015
    Reserved3 = 1015,
}

impl CloseCode {
    /// Every code, in ascending numeric order.
    pub const ALL: [CloseCode; 16] = [
        CloseCode::Normal,
        CloseCode::GoingAway,
        CloseCode::ProtocolError,
        CloseCode::UnknownData,
        CloseCode::Reserved1,
        CloseCode::NoStatus,
        CloseCode::Abnormal,
        CloseCode::BadPayload,
        CloseCode::PolicyError,
        CloseCode::TooBig,
        CloseCode::NeedsExtension,
        CloseCode::InternalError,
        CloseCode::ServiceRestart,
        CloseCode::TryAgainLater,
        CloseCode::Reserved2,
        CloseCode::Reserved3,
    ];

    /// Numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Look up a code by value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        if value < 1000 || value > 1015 {
            return None;
        }
        Some(Self::ALL[(value - 1000) as usize])
    }

    /// Map a value received from a peer, falling back to
    /// [`CloseCode::NoStatus`] for codes outside this registry.
    #[must_use]
    pub const fn from_wire(value: u16) -> Self {
        match Self::from_u16(value) {
            Some(code) => code,
            None => CloseCode::NoStatus,
        }
    }

    /// Wire-level counterpart.
    #[must_use]
    pub const fn to_transport_code(self) -> message::CloseCode {
        match self {
            CloseCode::Normal => message::CloseCode::Normal,
            CloseCode::GoingAway => message::CloseCode::GoingAway,
            CloseCode::ProtocolError => message::CloseCode::ProtocolError,
            CloseCode::UnknownData => message::CloseCode::UnsupportedData,
            CloseCode::Reserved1 => message::CloseCode::Reserved,
            CloseCode::NoStatus => message::CloseCode::NoStatusReceived,
            CloseCode::Abnormal => message::CloseCode::Abnormal,
            CloseCode::BadPayload => message::CloseCode::InvalidPayload,
            CloseCode::PolicyError => message::CloseCode::PolicyViolation,
            CloseCode::TooBig => message::CloseCode::MessageTooBig,
            CloseCode::NeedsExtension => message::CloseCode::MandatoryExtension,
            CloseCode::InternalError => message::CloseCode::InternalError,
            CloseCode::ServiceRestart => message::CloseCode::ServiceRestart,
            CloseCode::TryAgainLater => message::CloseCode::TryAgainLater,
            CloseCode::Reserved2 => message::CloseCode::BadGateway,
            CloseCode::Reserved3 => message::CloseCode::TlsHandshake,
        }
    }

    /// Resource code for a wire-level code; unregistered codes become
    /// [`CloseCode::NoStatus`].
    #[must_use]
    pub const fn from_transport_code(code: message::CloseCode) -> Self {
        Self::from_wire(code.as_u16())
    }

    /// Code to put in an outgoing close frame. Codes that RFC 6455 forbids
    /// on the wire (1004-1006, 1015) are sent as `None`, i.e. an empty close
    /// frame.
    #[must_use]
    pub const fn wire_code(self) -> Option<u16> {
        if self.to_transport_code().is_reserved() {
            None
        } else {
            Some(self.as_u16())
        }
    }
}

const _: () = {
    let mut i = 0;
    while i < CloseCode::ALL.len() {
        let code = CloseCode::ALL[i];
        assert!(
            code.to_transport_code().as_u16() == code.as_u16(),
            "resource and transport close codes disagree"
        );
        assert!(code.as_u16() == 1000 + i as u16, "CloseCode::ALL out of order");
        i += 1;
    }
};

impl From<CloseCode> for message::CloseCode {
    fn from(code: CloseCode) -> Self {
        code.to_transport_code()
    }
}

impl From<message::CloseCode> for CloseCode {
    fn from(code: message::CloseCode) -> Self {
        CloseCode::from_transport_code(code)
    }
}

impl From<CloseCode> for TungsteniteCloseCode {
    fn from(code: CloseCode) -> Self {
        TungsteniteCloseCode::from(code.as_u16())
    }
}

impl From<TungsteniteCloseCode> for CloseCode {
    fn from(code: TungsteniteCloseCode) -> Self {
        CloseCode::from_wire(u16::from(code))
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_match_transport() {
        for code in CloseCode::ALL {
            assert_eq!(code.to_transport_code().as_u16(), code.as_u16());
            assert_eq!(CloseCode::from(code.to_transport_code()), code);
        }
    }

    #[test]
    fn test_values_match_tungstenite() {
        for code in CloseCode::ALL {
            let theirs = TungsteniteCloseCode::from(code);
            assert_eq!(u16::from(theirs), code.as_u16());
            assert_eq!(CloseCode::from(theirs), code);
        }
    }

    #[test]
    fn test_order_preserving() {
        for pair in CloseCode::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_transport_code().as_u16() < pair[1].to_transport_code().as_u16());
        }
    }

    #[test]
    fn test_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), Some(CloseCode::Normal));
        assert_eq!(CloseCode::from_u16(1015), Some(CloseCode::Reserved3));
        assert_eq!(CloseCode::from_u16(999), None);
        assert_eq!(CloseCode::from_u16(4000), None);
    }

    #[test]
    fn test_unknown_wire_codes_become_no_status() {
        assert_eq!(CloseCode::from_wire(4000), CloseCode::NoStatus);
        assert_eq!(
            CloseCode::from_transport_code(message::CloseCode::Other(3001)),
            CloseCode::NoStatus
        );
        assert_eq!(CloseCode::from_wire(1001), CloseCode::GoingAway);
    }

    #[test]
    fn test_wire_code_suppresses_reserved() {
        assert_eq!(CloseCode::Normal.wire_code(), Some(1000));
        assert_eq!(CloseCode::BadPayload.wire_code(), Some(1007));
        assert_eq!(CloseCode::NoStatus.wire_code(), None);
        assert_eq!(CloseCode::Abnormal.wire_code(), None);
        assert_eq!(CloseCode::Reserved3.wire_code(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(CloseCode::GoingAway.to_string(), "GoingAway (1001)");
    }
}
